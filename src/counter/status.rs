//! PDH status codes shared by every counter backend
//!
//! The Windows backend passes these straight through from `pdh.dll`; the
//! Linux backend reports the same codes so the session policy in
//! [`CounterSession`](super::CounterSession) behaves identically everywhere.

/// Raw status returned by a [`CounterQuery`](super::CounterQuery) call
pub type Status = u32;

pub const ERROR_SUCCESS: Status = 0;

pub const PDH_CSTATUS_NO_INSTANCE: Status = 0x8000_07D1;
pub const PDH_NO_DATA: Status = 0x8000_07D5;
pub const PDH_CALC_NEGATIVE_DENOMINATOR: Status = 0x8000_07D6;
pub const PDH_CALC_NEGATIVE_TIMEBASE: Status = 0x8000_07D7;
pub const PDH_CALC_NEGATIVE_VALUE: Status = 0x8000_07D8;
pub const PDH_CSTATUS_NO_OBJECT: Status = 0xC000_0BB8;
pub const PDH_CSTATUS_NO_COUNTER: Status = 0xC000_0BB9;
pub const PDH_CSTATUS_INVALID_DATA: Status = 0xC000_0BBA;
pub const PDH_MEMORY_ALLOCATION_FAILURE: Status = 0xC000_0BBB;
pub const PDH_INVALID_HANDLE: Status = 0xC000_0BBC;
pub const PDH_INVALID_ARGUMENT: Status = 0xC000_0BBD;
pub const PDH_CSTATUS_BAD_COUNTERNAME: Status = 0xC000_0BC0;
pub const PDH_INVALID_PATH: Status = 0xC000_0BC4;
pub const PDH_INVALID_INSTANCE: Status = 0xC000_0BC5;
pub const PDH_INVALID_DATA: Status = 0xC000_0BC6;

const MESSAGES: &[(Status, &str)] = &[
    (PDH_CSTATUS_NO_INSTANCE, "The specified instance is not present."),
    (PDH_NO_DATA, "No data to return."),
    (
        PDH_CALC_NEGATIVE_DENOMINATOR,
        "A counter with a negative denominator value was detected.",
    ),
    (
        PDH_CALC_NEGATIVE_TIMEBASE,
        "A counter with a negative timebase value was detected.",
    ),
    (
        PDH_CALC_NEGATIVE_VALUE,
        "A counter with a negative value was detected.",
    ),
    (
        PDH_CSTATUS_NO_OBJECT,
        "Unable to find the specified object on the computer or in the log file.",
    ),
    (PDH_CSTATUS_NO_COUNTER, "The specified counter could not be found."),
    (PDH_CSTATUS_INVALID_DATA, "The returned data is not valid."),
    (
        PDH_MEMORY_ALLOCATION_FAILURE,
        "A PDH function could not allocate enough temporary memory to complete the operation.",
    ),
    (PDH_INVALID_HANDLE, "The handle is not a valid PDH object."),
    (PDH_INVALID_ARGUMENT, "A required argument is missing or incorrect."),
    (
        PDH_CSTATUS_BAD_COUNTERNAME,
        "Unable to parse the counter path. Check the format and syntax of the specified path.",
    ),
    (PDH_INVALID_PATH, "The specified counter path could not be interpreted."),
    (PDH_INVALID_INSTANCE, "The instance name could not be read from the specified counter path."),
    (PDH_INVALID_DATA, "The data is not valid."),
];

/// Counter-calculation artifacts of ratio counters sampled too quickly
pub fn is_calculation_artifact(status: Status) -> bool {
    matches!(
        status,
        PDH_CALC_NEGATIVE_DENOMINATOR | PDH_CALC_NEGATIVE_TIMEBASE | PDH_CALC_NEGATIVE_VALUE
    )
}

/// Statuses meaning the counter's instance no longer resolves
pub fn is_stale(status: Status) -> bool {
    matches!(
        status,
        PDH_CSTATUS_NO_INSTANCE | PDH_NO_DATA | PDH_CSTATUS_INVALID_DATA | PDH_INVALID_DATA
    )
}

/// Human-readable description of a PDH status or OS error code
pub fn describe(status: Status) -> String {
    if let Some((_, message)) = MESSAGES.iter().find(|(code, _)| *code == status) {
        return (*message).to_string();
    }
    if status <= 0xFFFF {
        return std::io::Error::from_raw_os_error(status as i32).to_string();
    }
    format!("Unknown status 0x{:08X}", status)
}

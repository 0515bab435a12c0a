// SPDX-License-Identifier: AGPL-3.0-or-later

//! ToolHelp32 process enumeration

use super::{is_pseudo_process, ProcessRecord};
use crate::error::{Error, Result};
use ::windows::core::{w, PCWSTR, PWSTR};
use ::windows::Win32::Foundation::{
    CloseHandle, ERROR_NONE_MAPPED, FILETIME, HANDLE, LUID,
};
use ::windows::Win32::Security::{
    AdjustTokenPrivileges, GetTokenInformation, LookupAccountSidW, LookupPrivilegeValueW,
    TokenUser, LUID_AND_ATTRIBUTES, SE_PRIVILEGE_ENABLED, SID_NAME_USE, TOKEN_ADJUST_PRIVILEGES,
    TOKEN_PRIVILEGES, TOKEN_QUERY, TOKEN_USER,
};
use ::windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};
use ::windows::Win32::System::ProcessStatus::{
    GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS, PROCESS_MEMORY_COUNTERS_EX,
};
use ::windows::Win32::System::Threading::{
    GetCurrentProcess, GetExitCodeProcess, GetProcessHandleCount, GetProcessTimes, OpenProcess,
    OpenProcessToken, QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_INFORMATION,
    PROCESS_VM_READ,
};

/// FILETIME ticks (100ns) per millisecond
const TICKS_PER_MS: u64 = 10_000;
/// 100ns intervals between 1601-01-01 and 1970-01-01
const UNIX_EPOCH_TICKS: u64 = 116_444_736_000_000_000;

/// Handle closed when dropped
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            let _ = unsafe { CloseHandle(self.0) };
        }
    }
}

fn fault(e: ::windows::core::Error) -> Error {
    Error::system(e.code().0 as u32)
}

fn filetime_ticks(ft: &FILETIME) -> u64 {
    ((ft.dwHighDateTime as u64) << 32) | ft.dwLowDateTime as u64
}

fn wide_to_string(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

/// Enable `SeDebugPrivilege` on the current process token
///
/// Needed to open processes owned by other users. Without elevation the
/// call succeeds but the privilege is not granted. Listing continues with
/// the rights the caller has whether or not this succeeds.
fn enable_debug_privilege() -> Result<()> {
    unsafe {
        let mut token = HANDLE::default();
        OpenProcessToken(
            GetCurrentProcess(),
            TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
            &mut token,
        )
        .map_err(fault)?;
        let token = OwnedHandle(token);

        let mut luid = LUID::default();
        LookupPrivilegeValueW(PCWSTR::null(), w!("SeDebugPrivilege"), &mut luid)
            .map_err(fault)?;

        let privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: luid,
                Attributes: SE_PRIVILEGE_ENABLED,
            }],
        };
        AdjustTokenPrivileges(token.0, false, Some(&privileges as *const _), 0, None, None)
            .map_err(fault)?;
    }
    Ok(())
}

fn executable_dir(handle: HANDLE) -> Option<String> {
    let mut buf = [0u16; 1024];
    let mut len = buf.len() as u32;
    unsafe {
        QueryFullProcessImageNameW(handle, PROCESS_NAME_WIN32, PWSTR(buf.as_mut_ptr()), &mut len)
            .ok()?;
    }
    let full = String::from_utf16_lossy(&buf[..len as usize]);
    std::path::Path::new(&full)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
}

fn owner(handle: HANDLE) -> Option<String> {
    unsafe {
        let mut token = HANDLE::default();
        OpenProcessToken(handle, TOKEN_QUERY, &mut token).ok()?;
        let token = OwnedHandle(token);

        let mut length = 0u32;
        let _ = GetTokenInformation(token.0, TokenUser, None, 0, &mut length);
        if length == 0 {
            return None;
        }
        let mut info = vec![0u8; length as usize];
        GetTokenInformation(
            token.0,
            TokenUser,
            Some(info.as_mut_ptr() as *mut _),
            length,
            &mut length,
        )
        .ok()?;
        let user = &*(info.as_ptr() as *const TOKEN_USER);

        let mut name = [0u16; 256];
        let mut name_len = name.len() as u32;
        let mut domain = [0u16; 256];
        let mut domain_len = domain.len() as u32;
        let mut sid_type = SID_NAME_USE::default();
        match LookupAccountSidW(
            PCWSTR::null(),
            user.User.Sid,
            PWSTR(name.as_mut_ptr()),
            &mut name_len,
            PWSTR(domain.as_mut_ptr()),
            &mut domain_len,
            &mut sid_type,
        ) {
            Ok(()) => Some(format!(
                "{}\\{}",
                wide_to_string(&domain),
                wide_to_string(&name)
            )),
            Err(e) if e.code() == ERROR_NONE_MAPPED.to_hresult() => {
                Some("Unknown\\Unknown".to_string())
            }
            Err(_) => None,
        }
    }
}

/// Fill the fields that need an open process handle
///
/// Each query is independent; one refusal leaves only its own fields empty.
fn fill_from_handle(handle: HANDLE, record: &mut ProcessRecord) {
    record.path = executable_dir(handle);
    record.owner = owner(handle);

    unsafe {
        let mut creation = FILETIME::default();
        let mut exit = FILETIME::default();
        let mut kernel = FILETIME::default();
        let mut user = FILETIME::default();
        if GetProcessTimes(handle, &mut creation, &mut exit, &mut kernel, &mut user).is_ok() {
            record.kernel_time_ms = (filetime_ticks(&kernel) / TICKS_PER_MS) as f64;
            record.user_time_ms = (filetime_ticks(&user) / TICKS_PER_MS) as f64;
            record.start_time_ms =
                (filetime_ticks(&creation).saturating_sub(UNIX_EPOCH_TICKS) / TICKS_PER_MS) as f64;
        }

        let mut counters = PROCESS_MEMORY_COUNTERS_EX {
            cb: std::mem::size_of::<PROCESS_MEMORY_COUNTERS_EX>() as u32,
            ..Default::default()
        };
        if GetProcessMemoryInfo(
            handle,
            std::ptr::addr_of_mut!(counters) as *mut PROCESS_MEMORY_COUNTERS,
            counters.cb,
        )
        .is_ok()
        {
            record.physical_memory_kb = (counters.WorkingSetSize as u64 / 1024) as f64;
            record.virtual_memory_kb = (counters.PrivateUsage as u64 / 1024) as f64;
        }

        let mut handles = 0u32;
        if GetProcessHandleCount(handle, &mut handles).is_ok() {
            record.handles = handles;
        }

        let mut code = 0u32;
        if GetExitCodeProcess(handle, &mut code).is_ok() {
            record.status = Some(code);
        }
    }
}

pub(super) fn list_processes(acquire_debug_privilege: bool) -> Result<Vec<ProcessRecord>> {
    if acquire_debug_privilege {
        list_with(enable_debug_privilege)
    } else {
        list_with(|| Ok(()))
    }
}

/// Only a failed snapshot fails the listing
fn list_with(acquire_privilege: impl FnOnce() -> Result<()>) -> Result<Vec<ProcessRecord>> {
    if let Err(e) = acquire_privilege() {
        log::warn!("Cannot enable SeDebugPrivilege, listing with current rights: {}", e);
    }

    let mut records = Vec::new();
    unsafe {
        let snapshot = OwnedHandle(CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0).map_err(fault)?);

        let mut entry = PROCESSENTRY32W {
            dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };
        Process32FirstW(snapshot.0, &mut entry).map_err(fault)?;

        loop {
            let pid = entry.th32ProcessID;
            if !is_pseudo_process(pid) {
                let mut record = ProcessRecord {
                    pid,
                    ppid: entry.th32ParentProcessID,
                    name: wide_to_string(&entry.szExeFile),
                    priority: entry.pcPriClassBase,
                    threads: entry.cntThreads,
                    ..Default::default()
                };

                match OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, false, pid) {
                    Ok(handle) => {
                        let handle = OwnedHandle(handle);
                        fill_from_handle(handle.0, &mut record);
                    }
                    Err(e) => log::trace!("Cannot open process {}: {}", pid, e),
                }
                records.push(record);
            }

            if Process32NextW(snapshot.0, &mut entry).is_err() {
                break;
            }
        }
    }

    Ok(records)
}

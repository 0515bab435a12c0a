//! `/proc` process enumeration
//!
//! Also hosts the `/proc` readers the Linux counter backend samples from,
//! so both agree on process names and enumeration order.

use super::{is_pseudo_process, ProcessRecord};
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Fields of `/proc/[pid]/stat` the crate uses
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct StatFields {
    pub name: String,
    pub ppid: u32,
    pub utime: u64,
    pub stime: u64,
    pub priority: i32,
    pub num_threads: u32,
    pub starttime: u64,
}

/// Clock ticks per second (`SC_CLK_TCK`)
pub(crate) fn clock_ticks() -> f64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as f64
    } else {
        100.0
    }
}

/// Page size in bytes
pub(crate) fn page_size() -> u64 {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}

/// Listed pids in ascending order, pseudo-processes excluded
pub(crate) fn pids() -> Result<Vec<u32>> {
    pids_in(Path::new("/proc"))
}

fn pids_in(proc_dir: &Path) -> Result<Vec<u32>> {
    let mut pids: Vec<u32> = fs::read_dir(proc_dir)
        .map_err(Error::os)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_string_lossy().parse::<u32>().ok())
        .filter(|pid| !is_pseudo_process(*pid))
        .collect();
    pids.sort_unstable();
    Ok(pids)
}

/// Parse a `/proc/[pid]/stat` line
///
/// The command name may contain spaces and parentheses, so it runs from the
/// first `(` to the last `)`.
pub(crate) fn parse_stat(stat: &str) -> Option<StatFields> {
    let start = stat.find('(')?;
    let end = stat.rfind(')')?;
    if end < start {
        return None;
    }
    let name = stat[start + 1..end].to_string();
    let fields: Vec<&str> = stat.get(end + 1..)?.split_whitespace().collect();
    if fields.len() < 20 {
        return None;
    }

    Some(StatFields {
        name,
        ppid: fields[1].parse().unwrap_or(0),
        utime: fields[11].parse().unwrap_or(0),
        stime: fields[12].parse().unwrap_or(0),
        priority: fields[15].parse().unwrap_or(0),
        num_threads: fields[17].parse().unwrap_or(0),
        starttime: fields[19].parse().unwrap_or(0),
    })
}

pub(crate) fn read_stat(pid: u32) -> Option<StatFields> {
    let content = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_stat(&content)
}

/// Resident and private (data + stack) bytes from `/proc/[pid]/statm`
pub(crate) fn read_statm(pid: u32) -> Option<(u64, u64)> {
    let content = fs::read_to_string(format!("/proc/{}/statm", pid)).ok()?;
    let parts: Vec<u64> = content
        .split_whitespace()
        .filter_map(|p| p.parse().ok())
        .collect();
    if parts.len() < 6 {
        return None;
    }
    let page = page_size();
    Some((parts[1] * page, parts[5] * page))
}

/// Open file descriptors, the Linux analogue of a handle count
pub(crate) fn count_fds(pid: u32) -> Option<u32> {
    fs::read_dir(format!("/proc/{}/fd", pid))
        .ok()
        .map(|dir| dir.filter(|e| e.is_ok()).count() as u32)
}

/// Boot time in seconds since the epoch (`btime` in `/proc/stat`)
fn boot_time() -> Option<u64> {
    let content = fs::read_to_string("/proc/stat").ok()?;
    content
        .lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|v| v.trim().parse().ok())
}

fn read_exe_dir(pid: u32) -> Option<String> {
    let exe = fs::read_link(format!("/proc/{}/exe", pid)).ok()?;
    exe.parent().map(|p| p.to_string_lossy().into_owned())
}

fn read_owner(pid: u32) -> Option<String> {
    let content = fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    let uid = content
        .lines()
        .find(|line| line.starts_with("Uid:"))?
        .split_whitespace()
        .nth(1)?
        .parse::<u32>()
        .ok()?;
    let passwd = fs::read_to_string("/etc/passwd").ok();
    Some(
        passwd
            .as_deref()
            .and_then(|p| username_for_uid(p, uid))
            .unwrap_or_else(|| uid.to_string()),
    )
}

fn username_for_uid(passwd: &str, uid: u32) -> Option<String> {
    passwd.lines().find_map(|line| {
        let mut parts = line.split(':');
        let name = parts.next()?;
        let line_uid = parts.nth(1)?.parse::<u32>().ok()?;
        (line_uid == uid).then(|| name.to_string())
    })
}

fn read_record(pid: u32, ticks: f64, boot_ms: f64) -> Option<ProcessRecord> {
    // A process that exits mid-walk has no stat and is simply skipped
    let stat = read_stat(pid)?;
    let (resident, private) = read_statm(pid).unwrap_or((0, 0));

    Some(ProcessRecord {
        pid,
        ppid: stat.ppid,
        name: stat.name,
        path: read_exe_dir(pid),
        owner: read_owner(pid),
        priority: stat.priority,
        status: None,
        handles: count_fds(pid).unwrap_or(0),
        threads: stat.num_threads,
        kernel_time_ms: stat.stime as f64 * 1000.0 / ticks,
        user_time_ms: stat.utime as f64 * 1000.0 / ticks,
        start_time_ms: boot_ms + stat.starttime as f64 * 1000.0 / ticks,
        physical_memory_kb: (resident / 1024) as f64,
        virtual_memory_kb: (private / 1024) as f64,
    })
}

pub(crate) fn list_processes() -> Result<Vec<ProcessRecord>> {
    let ticks = clock_ticks();
    let boot_ms = boot_time().unwrap_or(0) as f64 * 1000.0;

    Ok(pids()?
        .into_iter()
        .filter_map(|pid| read_record(pid, ticks, boot_ms))
        .collect())
}

//! CPU affinity for worker threads.

use std::io;

/// Pin the current thread to one CPU.
///
/// Uses `sched_setaffinity` on Linux and does nothing elsewhere.
#[cfg(target_os = "linux")]
pub fn set_cpu_affinity(cpu_id: usize) -> io::Result<()> {
    if cpu_id >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cpu {} out of range", cpu_id),
        ));
    }

    // SAFETY: cpu_set_t is plain data and cpu_id was bounds-checked above.
    let result = unsafe {
        let mut cpu_set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut cpu_set);
        libc::CPU_SET(cpu_id, &mut cpu_set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &cpu_set)
    };

    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_cpu_affinity(_cpu_id: usize) -> io::Result<()> {
    Ok(())
}

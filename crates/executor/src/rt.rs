//! Worker thread scheduling attributes.
//!
//! [`apply_thread_attributes`] is the only platform-specific entry point: it pins the
//! calling thread to the configured CPUs and switches its scheduling class. On platforms
//! without these controls, anything other than the default attributes is reported as
//! unsupported.

use contracts::{ContractError, ThreadAttributes};

/// Apply `attrs` to the calling thread.
///
/// # Errors
/// `Scheduling` when the OS refuses the affinity or policy change (commonly missing
/// `CAP_SYS_NICE`), or when the platform has no such controls.
pub fn apply_thread_attributes(
    worker: usize,
    attrs: &ThreadAttributes,
) -> Result<(), ContractError> {
    if attrs.cpus.is_empty() && attrs.policy.is_default() {
        return Ok(());
    }
    imp::apply(worker, attrs)
}

#[cfg(target_os = "linux")]
mod imp {
    use std::io;

    use contracts::{ContractError, SchedPolicy, ThreadAttributes};

    const SCHED_DEADLINE: u32 = 6;

    /// Kernel `struct sched_attr` (SCHED_ATTR_SIZE_VER0); fields are read by the kernel
    #[repr(C)]
    #[allow(dead_code)]
    #[derive(Debug, Default)]
    struct SchedAttr {
        size: u32,
        sched_policy: u32,
        sched_flags: u64,
        sched_nice: i32,
        sched_priority: u32,
        sched_runtime: u64,
        sched_deadline: u64,
        sched_period: u64,
    }

    pub(super) fn apply(worker: usize, attrs: &ThreadAttributes) -> Result<(), ContractError> {
        if !attrs.cpus.is_empty() {
            set_affinity(&attrs.cpus)
                .map_err(|e| ContractError::scheduling(worker, format!("cpu affinity: {e}")))?;
        }
        set_policy(attrs.policy)
            .map_err(|e| ContractError::scheduling(worker, format!("{:?}: {e}", attrs.policy)))
    }

    fn set_affinity(cpus: &[usize]) -> io::Result<()> {
        // SAFETY: cpu_set_t is plain data, every index is checked against CPU_SETSIZE
        // before CPU_SET, and 0 targets the calling thread.
        unsafe {
            let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut cpuset);
            for &cpu in cpus {
                if cpu >= libc::CPU_SETSIZE as usize {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("cpu {cpu} exceeds CPU_SETSIZE"),
                    ));
                }
                libc::CPU_SET(cpu, &mut cpuset);
            }
            let result =
                libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &cpuset);
            if result == 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        }
    }

    fn set_policy(policy: SchedPolicy) -> io::Result<()> {
        let (class, priority) = match policy {
            SchedPolicy::Other => return Ok(()),
            SchedPolicy::Fifo { priority } => (libc::SCHED_FIFO, priority),
            SchedPolicy::RoundRobin { priority } => (libc::SCHED_RR, priority),
            SchedPolicy::Deadline {
                runtime_ns,
                deadline_ns,
                period_ns,
            } => return set_deadline(runtime_ns, deadline_ns, period_ns),
        };

        let param = libc::sched_param {
            sched_priority: priority,
        };
        // SAFETY: param outlives the call; 0 targets the calling thread.
        let result = unsafe { libc::sched_setscheduler(0, class, &param) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn set_deadline(runtime: u64, deadline: u64, period: u64) -> io::Result<()> {
        let attr = SchedAttr {
            size: std::mem::size_of::<SchedAttr>() as u32,
            sched_policy: SCHED_DEADLINE,
            sched_runtime: runtime,
            sched_deadline: deadline,
            sched_period: period,
            ..SchedAttr::default()
        };
        // SAFETY: attr is a correctly sized sched_attr that outlives the call;
        // pid 0 targets the calling thread, flags must be 0.
        let result = unsafe {
            libc::syscall(
                libc::SYS_sched_setattr,
                0 as libc::pid_t,
                &attr as *const SchedAttr,
                0 as libc::c_uint,
            )
        };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

}

#[cfg(not(target_os = "linux"))]
mod imp {
    use contracts::{ContractError, ThreadAttributes};

    pub(super) fn apply(worker: usize, _attrs: &ThreadAttributes) -> Result<(), ContractError> {
        Err(ContractError::scheduling(
            worker,
            "thread attributes are not supported on this platform",
        ))
    }
}

use nix::sys::resource::{setrlimit, Resource};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

use crate::{
    config::{ExecutionConfig, LimitCeilings, LimitDefaults, MIN_INTERPRETER_MEMORY_MB},
    error::Error,
    types::duration_serde,
    Result,
};

/// Caller-supplied limit overrides. Unset fields fall back to the configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitOverrides {
    #[serde(alias = "memoryMb")]
    pub memory_mb: Option<u64>,
    #[serde(alias = "cpuSeconds")]
    pub cpu_seconds: Option<u64>,
    #[serde(alias = "timeoutSeconds")]
    pub timeout_seconds: Option<f64>,
}

impl LimitOverrides {
    /// Fields set on `self` win, the rest are taken from `fallback`.
    pub fn or(self, fallback: LimitOverrides) -> LimitOverrides {
        LimitOverrides {
            memory_mb: self.memory_mb.or(fallback.memory_mb),
            cpu_seconds: self.cpu_seconds.or(fallback.cpu_seconds),
            timeout_seconds: self.timeout_seconds.or(fallback.timeout_seconds),
        }
    }
}

/// Concrete OS-level caps for one execution unit.
///
/// Computed once per request and applied in the child between `fork` and
/// `exec`, so the guest never runs without them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceLimits {
    /// Address-space ceiling (MiB)
    pub memory_mb: u64,
    /// CPU-time ceiling (seconds). The kernel sends SIGXCPU at this value
    /// and SIGKILL one second later.
    pub cpu_seconds: u64,
    /// Wall-clock ceiling enforced by the watchdog
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Bytes kept from each of stdout and stderr
    pub output_bytes: usize,
    /// RLIMIT_NPROC value; 0 forbids any fork
    pub max_processes: u64,
    /// Time between SIGTERM and SIGKILL when the watchdog fires
    #[serde(with = "duration_serde")]
    pub grace_period: Duration,
}

impl ResourceLimits {
    pub fn memory_bytes(&self) -> u64 {
        self.memory_mb * 1024 * 1024
    }

    /// Upper bound on how long a unit can hold its caller.
    pub fn worst_case_wall_time(&self) -> Duration {
        self.timeout + self.grace_period
    }

    /// Install the caps as a `pre_exec` hook on `command`.
    pub(crate) fn apply_to(&self, command: &mut Command) {
        let memory = self.memory_bytes();
        let cpu = self.cpu_seconds;
        let processes = self.max_processes;

        // SAFETY: the hook runs in the forked child before exec and only
        // issues setrlimit/prctl system calls on copied values.
        unsafe {
            command.pre_exec(move || {
                #[cfg(target_os = "linux")]
                {
                    setrlimit(Resource::RLIMIT_AS, memory, memory)?;
                    if nix::libc::prctl(nix::libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                }

                #[cfg(not(target_os = "linux"))]
                {
                    // RLIMIT_AS is not enforced here; RLIMIT_DATA is the closest cap.
                    setrlimit(Resource::RLIMIT_DATA, memory, memory)?;
                }

                setrlimit(Resource::RLIMIT_CPU, cpu, cpu + 1)?;
                setrlimit(Resource::RLIMIT_FSIZE, 0, 0)?;
                setrlimit(Resource::RLIMIT_NPROC, processes, processes)?;
                setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
                Ok(())
            });
        }
    }
}

/// Turns request overrides into [`ResourceLimits`], clamped to the configured ceilings.
#[derive(Debug, Clone)]
pub struct ResourceLimiter {
    defaults: LimitDefaults,
    ceilings: LimitCeilings,
}

impl ResourceLimiter {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            defaults: config.default_limits.clone(),
            ceilings: config.ceilings.clone(),
        }
    }

    pub fn defaults(&self) -> ResourceLimits {
        // Defaults are validated at config load time.
        self.build(self.defaults.memory_mb, self.defaults.cpu_seconds, self.defaults.timeout_seconds)
    }

    pub fn limits_for(&self, overrides: &LimitOverrides) -> Result<ResourceLimits> {
        if let Some(timeout) = overrides.timeout_seconds {
            if !(timeout.is_finite() && timeout > 0.0) {
                return Err(Error::InvalidArgument(format!(
                    "timeout_seconds must be a positive number, got {}",
                    timeout
                )));
            }
        }
        if overrides.cpu_seconds == Some(0) {
            return Err(Error::InvalidArgument("cpu_seconds must be at least 1".into()));
        }

        let mut memory_mb = overrides.memory_mb.unwrap_or(self.defaults.memory_mb);
        let mut cpu_seconds = overrides.cpu_seconds.unwrap_or(self.defaults.cpu_seconds);
        let mut timeout = overrides
            .timeout_seconds
            .unwrap_or(self.defaults.timeout_seconds);

        if memory_mb > self.ceilings.memory_mb {
            warn!(
                "Requested memory {} MiB exceeds ceiling, clamping to {} MiB",
                memory_mb, self.ceilings.memory_mb
            );
            memory_mb = self.ceilings.memory_mb;
        }
        if memory_mb < MIN_INTERPRETER_MEMORY_MB {
            warn!(
                "Requested memory {} MiB is below the interpreter floor, raising to {} MiB",
                memory_mb, MIN_INTERPRETER_MEMORY_MB
            );
            memory_mb = MIN_INTERPRETER_MEMORY_MB;
        }
        if cpu_seconds > self.ceilings.cpu_seconds {
            warn!(
                "Requested CPU time {}s exceeds ceiling, clamping to {}s",
                cpu_seconds, self.ceilings.cpu_seconds
            );
            cpu_seconds = self.ceilings.cpu_seconds;
        }
        if timeout > self.ceilings.timeout_seconds {
            warn!(
                "Requested timeout {}s exceeds ceiling, clamping to {}s",
                timeout, self.ceilings.timeout_seconds
            );
            timeout = self.ceilings.timeout_seconds;
        }

        Ok(self.build(memory_mb, cpu_seconds, timeout))
    }

    fn build(&self, memory_mb: u64, cpu_seconds: u64, timeout_seconds: f64) -> ResourceLimits {
        ResourceLimits {
            memory_mb,
            cpu_seconds,
            timeout: Duration::from_secs_f64(timeout_seconds),
            output_bytes: self.defaults.output_bytes,
            max_processes: self.defaults.max_processes,
            grace_period: Duration::from_millis(self.defaults.grace_period_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> ResourceLimiter {
        ResourceLimiter::new(&ExecutionConfig::default())
    }

    #[test]
    fn test_defaults_when_no_overrides() {
        let limits = limiter().limits_for(&LimitOverrides::default()).unwrap();
        assert_eq!(limits, limiter().defaults());
        assert_eq!(limits.memory_mb, 128);
        assert_eq!(limits.cpu_seconds, 5);
        assert_eq!(limits.timeout, Duration::from_secs(5));
        assert_eq!(limits.max_processes, 0);
        assert_eq!(limits.worst_case_wall_time(), Duration::from_millis(5_500));
    }

    #[test]
    fn test_overrides_are_clamped_to_ceilings() {
        let limits = limiter()
            .limits_for(&LimitOverrides {
                memory_mb: Some(100_000),
                cpu_seconds: Some(3_600),
                timeout_seconds: Some(600.0),
            })
            .unwrap();
        assert_eq!(limits.memory_mb, 512);
        assert_eq!(limits.cpu_seconds, 30);
        assert_eq!(limits.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_memory_raised_to_interpreter_floor() {
        let limits = limiter()
            .limits_for(&LimitOverrides {
                memory_mb: Some(1),
                ..LimitOverrides::default()
            })
            .unwrap();
        assert_eq!(limits.memory_mb, MIN_INTERPRETER_MEMORY_MB);
    }

    #[test]
    fn test_invalid_timeouts_rejected() {
        for timeout in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = limiter()
                .limits_for(&LimitOverrides {
                    timeout_seconds: Some(timeout),
                    ..LimitOverrides::default()
                })
                .unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "{timeout}");
        }
    }

    #[test]
    fn test_override_merge_prefers_caller() {
        let caller = LimitOverrides {
            timeout_seconds: Some(1.0),
            ..LimitOverrides::default()
        };
        let operation = LimitOverrides {
            memory_mb: Some(64),
            timeout_seconds: Some(10.0),
            ..LimitOverrides::default()
        };
        let merged = caller.or(operation);
        assert_eq!(merged.timeout_seconds, Some(1.0));
        assert_eq!(merged.memory_mb, Some(64));
        assert_eq!(merged.cpu_seconds, None);
    }
}

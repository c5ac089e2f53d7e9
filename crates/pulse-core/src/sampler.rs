//! Metric sources polled once per broadcast tick.
//!
//! Samplers never fail. A source that cannot be read yields the
//! [`UNAVAILABLE`](crate::UNAVAILABLE) sentinel so that the broadcast loop
//! only ever deals with strings.

use std::ffi::CStr;
use std::time::{Duration, Instant};

use sysinfo::System;
use tracing::debug;

use crate::metric::{MetricKey, Sample};

/// A source of metric samples.
pub trait Sampler: Send {
    /// Short name used in logs ("time", "system").
    fn name(&self) -> &'static str;

    /// The keys returned by [`sample`](Sampler::sample), in order.
    fn keys(&self) -> &'static [MetricKey];

    /// Reads the current value of every tracked metric.
    fn sample(&mut self) -> Vec<Sample>;
}

// ============================================================================
// Time sampler
// ============================================================================

/// Samples the local timezone and the time since the server started.
#[derive(Debug, Clone)]
pub struct TimeSampler {
    started: Instant,
}

impl TimeSampler {
    const KEYS: &'static [MetricKey] = &[MetricKey::Timezone, MetricKey::SessionDuration];

    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    /// Creates a sampler whose session began at `started`.
    pub fn started_at(started: Instant) -> Self {
        Self { started }
    }
}

impl Default for TimeSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for TimeSampler {
    fn name(&self) -> &'static str {
        "time"
    }

    fn keys(&self) -> &'static [MetricKey] {
        Self::KEYS
    }

    fn sample(&mut self) -> Vec<Sample> {
        let timezone = local_timezone_abbreviation()
            .map(|tz| Sample::new(MetricKey::Timezone, tz))
            .unwrap_or_else(|| Sample::unavailable(MetricKey::Timezone));

        vec![
            timezone,
            Sample::new(
                MetricKey::SessionDuration,
                format_session_duration(self.started.elapsed()),
            ),
        ]
    }
}

/// Formats a duration as `"{h}h {m}m {s}s"`.
///
/// Hours are not wrapped, so a day-long session reads `24h 0m 0s`.
pub fn format_session_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    format!("{hours}h {minutes}m {seconds}s")
}

/// Returns the abbreviated local timezone name (`strftime("%Z")`).
///
/// `TZ` and the zone database are re-read on every call, so a timezone
/// change while the server runs shows up on the next sample.
fn local_timezone_abbreviation() -> Option<String> {
    // The libc crate does not bind POSIX `tzset` on unix targets.
    extern "C" {
        fn tzset();
    }


    let mut buf = [0 as libc::c_char; 64];

    // SAFETY: `tm` is fully written by localtime_r before being read, the
    // format string is NUL-terminated and `buf` outlives the strftime call.
    let written = unsafe {
        // localtime_r does not reload the zone rules by itself.
        tzset();
        let now = libc::time(std::ptr::null_mut());
        let mut tm: libc::tm = std::mem::zeroed();
        if libc::localtime_r(&now, &mut tm).is_null() {
            return None;
        }
        libc::strftime(buf.as_mut_ptr(), buf.len(), b"%Z\0".as_ptr().cast(), &tm)
    };

    if written == 0 {
        return None;
    }

    // SAFETY: strftime returned a non-zero length, so `buf` holds a
    // NUL-terminated string.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Some(name.to_string_lossy().into_owned())
}

// ============================================================================
// System sampler
// ============================================================================

/// Samples free memory and this process's user-mode CPU time.
pub struct SystemSampler {
    system: System,
}

impl SystemSampler {
    const KEYS: &'static [MetricKey] = &[MetricKey::FreeMemoryPct, MetricKey::CpuUserTime];

    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn free_memory(&mut self) -> Sample {
        self.system.refresh_memory();
        match free_memory_percentage(self.system.available_memory(), self.system.total_memory()) {
            Some(pct) => Sample::new(MetricKey::FreeMemoryPct, format!("{pct}%")),
            None => {
                debug!("Total memory reported as zero");
                Sample::unavailable(MetricKey::FreeMemoryPct)
            }
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SystemSampler {
    fn name(&self) -> &'static str {
        "system"
    }

    fn keys(&self) -> &'static [MetricKey] {
        Self::KEYS
    }

    fn sample(&mut self) -> Vec<Sample> {
        let user_time = user_cpu_time()
            .map(|t| Sample::new(MetricKey::CpuUserTime, format_cpu_time(t)))
            .unwrap_or_else(|| Sample::unavailable(MetricKey::CpuUserTime));

        vec![self.free_memory(), user_time]
    }
}

/// Whole percentage of `available` over `total`, truncated.
pub fn free_memory_percentage(available: u64, total: u64) -> Option<u64> {
    if total == 0 {
        return None;
    }
    let pct = (u128::from(available) * 100) / u128::from(total);
    Some(u64::try_from(pct.min(100)).unwrap_or(100))
}

/// Formats CPU time as `"{secs}.{micros:06}s"`.
pub fn format_cpu_time(time: Duration) -> String {
    format!("{}.{:06}s", time.as_secs(), time.subsec_micros())
}

/// User-mode CPU time of the current process (`getrusage(RUSAGE_SELF)`).
fn user_cpu_time() -> Option<Duration> {
    // SAFETY: rusage is plain old data; getrusage fully initialises it on
    // success and we only read it in that case.
    let usage = unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) != 0 {
            return None;
        }
        usage
    };

    let secs = u64::try_from(usage.ru_utime.tv_sec).ok()?;
    let micros = u32::try_from(usage.ru_utime.tv_usec).ok()?;
    Some(Duration::from_secs(secs) + Duration::from_micros(u64::from(micros)))
}

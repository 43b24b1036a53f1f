//! Build-progress counter for the UI.

use crate::traits::BuildObserver;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const TIME_TO_STOP_REPORTING: Duration = Duration::from_secs(2);

/// Counts in-flight shader builds. A moving baseline advances after a
/// quiet period so stale counts are not reported forever.
pub struct ShaderNotify {
    num_building: AtomicI32,
    num_complete: AtomicI32,
    state: Mutex<BaselineState>,
}

#[derive(Default)]
struct BaselineState {
    report_base: i32,
    completed: bool,
    num_when_completed: i32,
    complete_time: Option<Instant>,
}

impl ShaderNotify {
    pub fn new() -> ShaderNotify {
        ShaderNotify {
            num_building: AtomicI32::new(0),
            num_complete: AtomicI32::new(0),
            state: Mutex::new(BaselineState::default()),
        }
    }

    pub fn shaders_building(&self) -> i32 {
        let now_complete = self.num_complete.load(Ordering::Relaxed);
        let now_building = self.num_building.load(Ordering::Relaxed);
        let mut state = self.state.lock().unwrap();
        if now_complete == now_building {
            let now = Instant::now();
            if state.completed && now_complete == state.num_when_completed {
                if let Some(complete_time) = state.complete_time {
                    if now - complete_time > TIME_TO_STOP_REPORTING {
                        state.report_base = now_complete;
                        state.completed = false;
                    }
                }
            } else {
                state.completed = true;
                state.num_when_completed = now_complete;
                state.complete_time = Some(now);
            }
        }
        now_building - state.report_base
    }
}

impl Default for ShaderNotify {
    fn default() -> ShaderNotify {
        ShaderNotify::new()
    }
}

impl BuildObserver for ShaderNotify {
    fn mark_shader_building(&self) {
        self.num_building.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_shader_complete(&self) {
        self.num_complete.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_in_flight_builds() {
        let notify = ShaderNotify::new();
        notify.mark_shader_building();
        notify.mark_shader_building();
        assert_eq!(notify.shaders_building(), 2);
        notify.mark_shader_complete();
        assert_eq!(notify.shaders_building(), 2);
        notify.mark_shader_complete();
        // Until the idle baseline advances the count stays visible.
        assert_eq!(notify.shaders_building(), 2);
    }
}

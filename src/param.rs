//! Param module: sample-accurate automation timelines for node parameters.
//!
//! An [`AudioParam`] holds a default value plus a time-ordered list of
//! automation events. Rendering asks for [`AudioParam::value_at`] once per
//! sample; callers schedule events at absolute audio-clock times.

/// Exponential ramps cannot pass through zero; both ends are clamped to this.
pub const EXPONENTIAL_FLOOR: f32 = 1.0e-4;

/// Smallest accepted time constant for [`AudioParam::set_target_at_time`].
const MIN_TIME_CONSTANT: f64 = 1.0e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParamEvent {
    SetValue { value: f32, time: f64 },
    LinearRamp { value: f32, time: f64 },
    ExponentialRamp { value: f32, time: f64 },
    SetTarget { target: f32, time: f64, time_constant: f64 },
}

impl ParamEvent {
    fn time(&self) -> f64 {
        match *self {
            ParamEvent::SetValue { time, .. }
            | ParamEvent::LinearRamp { time, .. }
            | ParamEvent::ExponentialRamp { time, .. }
            | ParamEvent::SetTarget { time, .. } => time,
        }
    }
}

/// An automatable parameter (gain, frequency, cutoff).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParam {
    default: f32,
    events: Vec<ParamEvent>,
}

impl AudioParam {
    /// Create a parameter with no automation.
    pub fn new(default: f32) -> Self {
        Self {
            default,
            events: Vec::new(),
        }
    }

    /// The value used before the first event.
    pub fn default_value(&self) -> f32 {
        self.default
    }

    /// Number of pending automation events.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Time of the latest scheduled event, if any.
    pub fn last_event_time(&self) -> Option<f64> {
        self.events.last().map(ParamEvent::time)
    }

    /// Value the parameter settles on once every event has run.
    pub fn final_value(&self) -> f32 {
        match self.events.last() {
            None => self.default,
            Some(ParamEvent::SetTarget { target, .. }) => *target,
            Some(last) => self.value_at(last.time()),
        }
    }

    /// Drop all automation and hold `value` from now on.
    pub fn reset(&mut self, value: f32) {
        self.events.clear();
        self.default = value;
    }

    fn insert(&mut self, event: ParamEvent) {
        // Events at equal times keep insertion order.
        let idx = self.events.partition_point(|e| e.time() <= event.time());
        self.events.insert(idx, event);
    }

    /// Jump to `value` at `time`.
    pub fn set_value_at_time(&mut self, value: f32, time: f64) -> &mut Self {
        self.insert(ParamEvent::SetValue { value, time });
        self
    }

    /// Ramp linearly from the previous event to `value`, arriving at `time`.
    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, time: f64) -> &mut Self {
        self.insert(ParamEvent::LinearRamp { value, time });
        self
    }

    /// Ramp exponentially from the previous event to `value`, arriving at `time`.
    pub fn exponential_ramp_to_value_at_time(&mut self, value: f32, time: f64) -> &mut Self {
        self.insert(ParamEvent::ExponentialRamp { value, time });
        self
    }

    /// Approach `target` exponentially from `start`, with the given time constant.
    pub fn set_target_at_time(&mut self, target: f32, start: f64, time_constant: f64) -> &mut Self {
        self.insert(ParamEvent::SetTarget {
            target,
            time: start,
            time_constant: time_constant.max(MIN_TIME_CONSTANT),
        });
        self
    }

    /// Remove every event scheduled at or after `time`.
    pub fn cancel_scheduled_values(&mut self, time: f64) -> &mut Self {
        self.events.retain(|e| e.time() < time);
        self
    }

    /// Freeze the parameter at its value at `time` and drop all other events.
    ///
    /// History before `time` is discarded. Samples already rendered are not
    /// affected, so a `time` in the past only rewrites the reported curve.
    pub fn cancel_and_hold_at_time(&mut self, time: f64) -> &mut Self {
        let held = self.value_at(time);
        self.events.clear();
        self.default = held;
        self.events.push(ParamEvent::SetValue { value: held, time });
        self
    }

    /// Evaluate the automation curve at `t`.
    pub fn value_at(&self, t: f64) -> f32 {
        let mut value = self.default;
        let mut anchor = f64::NEG_INFINITY;

        for (i, event) in self.events.iter().enumerate() {
            match *event {
                ParamEvent::SetValue { value: v, time } => {
                    if time > t {
                        return value;
                    }
                    value = v;
                    anchor = time;
                }
                ParamEvent::LinearRamp { value: v, time } => {
                    if time <= t {
                        value = v;
                        anchor = time;
                    } else {
                        if !anchor.is_finite() || t <= anchor {
                            return value;
                        }
                        let frac = ((t - anchor) / (time - anchor)) as f32;
                        return value + (v - value) * frac;
                    }
                }
                ParamEvent::ExponentialRamp { value: v, time } => {
                    if time <= t {
                        value = v;
                        anchor = time;
                    } else {
                        if !anchor.is_finite() || t <= anchor {
                            return value;
                        }
                        let from = value.max(EXPONENTIAL_FLOOR);
                        let to = v.max(EXPONENTIAL_FLOOR);
                        let frac = ((t - anchor) / (time - anchor)) as f32;
                        return from * (to / from).powf(frac);
                    }
                }
                ParamEvent::SetTarget {
                    target,
                    time,
                    time_constant,
                } => {
                    if time > t {
                        return value;
                    }
                    // A following ramp takes over from the target's start.
                    let until = match self.events.get(i + 1) {
                        Some(ParamEvent::SetValue { time: next, .. })
                        | Some(ParamEvent::SetTarget { time: next, .. }) => Some(*next),
                        Some(_) => Some(time),
                        None => None,
                    };
                    match until {
                        Some(next) if next <= t => {
                            value = approach(value, target, next - time, time_constant);
                            anchor = next;
                        }
                        _ => return approach(value, target, t - time, time_constant),
                    }
                }
            }
        }
        value
    }
}

fn approach(from: f32, target: f32, elapsed: f64, time_constant: f64) -> f32 {
    let k = (-(elapsed.max(0.0)) / time_constant).exp() as f32;
    target + (from - target) * k
}

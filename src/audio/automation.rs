use crate::audio_api::Automation;

/// Scheduled automation for one parameter.
///
/// Events are kept sorted by time. A ramp runs from the value and time of the
/// event before it; `Cancel { time }` drops every event at or after `time`.
#[derive(Clone, Debug)]
pub struct ParamTimeline {
    initial: f64,
    events: Vec<Automation>,
}

impl ParamTimeline {
    pub fn new(initial: f64) -> Self {
        Self { initial, events: Vec::new() }
    }

    pub fn events(&self) -> &[Automation] {
        &self.events
    }

    pub fn apply(&mut self, event: Automation) {
        match event {
            Automation::Cancel { time } => self.events.retain(|e| e.time() < time),
            _ => {
                // equal times keep insertion order
                let at = self.events.partition_point(|e| e.time() <= event.time());
                self.events.insert(at, event);
            }
        }
    }

    pub fn value_at(&self, t: f64) -> f64 {
        let mut value = self.initial;
        let mut from = 0.0;
        for (i, event) in self.events.iter().enumerate() {
            match *event {
                Automation::SetValue { value: v, time } => {
                    if time > t {
                        break;
                    }
                    value = v;
                    from = time;
                }
                Automation::LinearRamp { value: v, time } => {
                    if time <= t || time <= from {
                        value = v;
                        from = time;
                        continue;
                    }
                    let f = ((t - from) / (time - from)).clamp(0.0, 1.0);
                    return value + (v - value) * f;
                }
                Automation::ExponentialRamp { value: v, time } => {
                    if time <= t || time <= from {
                        value = v;
                        from = time;
                        continue;
                    }
                    if value * v <= 0.0 {
                        return value; // undefined across zero, hold
                    }
                    let f = ((t - from) / (time - from)).clamp(0.0, 1.0);
                    return value * (v / value).powf(f);
                }
                Automation::SetTarget { target, time, time_constant } => {
                    if time > t {
                        break;
                    }
                    let next = self.events.get(i + 1).map(Automation::time).unwrap_or(f64::INFINITY);
                    let until = t.min(next);
                    value = if time_constant <= 0.0 {
                        target
                    } else {
                        target + (value - target) * (-(until - time) / time_constant).exp()
                    };
                    from = until;
                    if next > t {
                        return value;
                    }
                }
                Automation::Cancel { .. } => {}
            }
        }
        value
    }

    /// Fold fully elapsed events into a single set-value so long-lived params
    /// (bus gains) don't grow without bound.
    pub fn prune(&mut self, t: f64) {
        let fold = self
            .events
            .iter()
            .enumerate()
            .take_while(|(_, e)| e.time() <= t)
            .filter(|(_, e)| !matches!(e, Automation::SetTarget { .. }))
            .map(|(i, _)| i)
            .last();
        let Some(last) = fold else { return };
        if last == 0 {
            return;
        }
        let time = self.events[last].time();
        let value = self.value_at(time);
        self.events.drain(..=last);
        self.events.insert(0, Automation::SetValue { value, time });
    }
}

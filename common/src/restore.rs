use log::info;

use crate::{
    codes,
    command::Command,
    status::{RestoreTrigger, StatusEvent},
    transmitter::{Effects, SignalTransmitter},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroPhase {
    Idle,
    Running,
}

/// Drives the heater from an unknown state to a known one: power on, select
/// temperature mode, step the setpoint up to the target, power off.
///
/// The heater powers up at its minimum setpoint after losing mains, so a
/// fixed number of up-steps lands on the same target every time.
#[derive(Debug, Clone)]
pub struct RestoreMacro {
    temp_steps: u16,
    phase: MacroPhase,
    completed_runs: u32,
}

impl RestoreMacro {
    pub fn new(temp_steps: u16) -> Self {
        Self {
            temp_steps,
            phase: MacroPhase::Idle,
            completed_runs: 0,
        }
    }

    pub fn phase(&self) -> MacroPhase {
        self.phase
    }

    pub fn completed_runs(&self) -> u32 {
        self.completed_runs
    }

    /// Runs the whole macro before returning.
    pub fn run<F: Effects + ?Sized>(
        &mut self,
        fx: &mut F,
        transmitter: &SignalTransmitter,
        trigger: RestoreTrigger,
        pre_delay_ms: u64,
    ) {
        self.phase = MacroPhase::Running;
        info!(
            "restore macro started ({}, {} steps)",
            trigger.as_str(),
            self.temp_steps
        );
        fx.report(StatusEvent::RestoreStart(trigger));

        if pre_delay_ms > 0 {
            fx.wait_ms(pre_delay_ms);
        }

        transmitter.send_labeled(fx, codes::IR_POWER_TOGGLE, Command::PowerToggle.as_str());
        transmitter.send_labeled(fx, codes::IR_TEMP_MODE, Command::TempMode.as_str());
        for _ in 0..self.temp_steps {
            transmitter.send_labeled(fx, codes::IR_TEMP_UP, Command::TempUp.as_str());
        }
        transmitter.send_labeled(fx, codes::IR_POWER_TOGGLE, Command::PowerToggle.as_str());

        fx.report(StatusEvent::RestoreDone(trigger));
        self.completed_runs = self.completed_runs.saturating_add(1);
        info!("restore macro finished ({})", trigger.as_str());
        self.phase = MacroPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codes::{IR_POWER_TOGGLE, IR_TEMP_MODE, IR_TEMP_UP},
        testing::RecordingEffects,
    };
    use pretty_assertions::assert_eq;

    fn expected_tags(steps: usize) -> Vec<String> {
        let mut tags = vec!["sent:power_toggle".to_string(), "sent:temp_mode".to_string()];
        tags.extend(std::iter::repeat("sent:temp_up".to_string()).take(steps));
        tags.push("sent:power_toggle".to_string());
        tags
    }

    #[test]
    fn sends_fixed_sequence_regardless_of_trigger() {
        for trigger in [
            RestoreTrigger::Button,
            RestoreTrigger::Mqtt,
            RestoreTrigger::BootPowerLoss,
        ] {
            let mut fx = RecordingEffects::default();
            let mut restore = RestoreMacro::new(20);
            restore.run(&mut fx, &SignalTransmitter::new(40, 180), trigger, 0);

            let statuses = fx.statuses();
            assert_eq!(statuses.first().unwrap(), &format!("restore:start:{}", trigger.as_str()));
            assert_eq!(statuses.last().unwrap(), &format!("restore:done:{}", trigger.as_str()));
            assert_eq!(statuses[1..statuses.len() - 1].to_vec(), expected_tags(20));

            let mut codes = vec![IR_POWER_TOGGLE, IR_TEMP_MODE];
            codes.extend(std::iter::repeat(IR_TEMP_UP).take(20));
            codes.push(IR_POWER_TOGGLE);
            let doubled: Vec<_> = codes.iter().flat_map(|c| [*c, *c]).collect();
            assert_eq!(fx.frames(), doubled);

            assert_eq!(restore.phase(), MacroPhase::Idle);
            assert_eq!(restore.completed_runs(), 1);
        }
    }

    #[test]
    fn zero_steps_still_toggles_power_twice() {
        let mut fx = RecordingEffects::default();
        RestoreMacro::new(0).run(
            &mut fx,
            &SignalTransmitter::new(40, 180),
            RestoreTrigger::Mqtt,
            0,
        );

        assert_eq!(
            fx.statuses(),
            vec![
                "restore:start:mqtt".to_string(),
                "sent:power_toggle".to_string(),
                "sent:temp_mode".to_string(),
                "sent:power_toggle".to_string(),
                "restore:done:mqtt".to_string(),
            ]
        );
    }

    #[test]
    fn pre_delay_precedes_first_frame() {
        let mut fx = RecordingEffects::default();
        RestoreMacro::new(1).run(
            &mut fx,
            &SignalTransmitter::new(40, 180),
            RestoreTrigger::Button,
            500,
        );

        assert_eq!(fx.frames_at()[0].0, 500);
        // 4 commands x (pause + gap) after the pre-delay.
        assert_eq!(fx.now_ms, 500 + 4 * 220);
    }
}

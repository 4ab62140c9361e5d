use log::{debug, warn};

use crate::{
    command::{Command, CommandAction},
    restore::RestoreMacro,
    status::{RestoreTrigger, StatusEvent},
    transmitter::{Effects, SignalTransmitter},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Sent(Command),
    Restored,
    Unknown,
}

/// Maps one command payload onto exactly one transmitter call or the restore
/// macro. Unknown payloads only produce `error:unknown_cmd`.
pub fn dispatch<F: Effects + ?Sized>(
    fx: &mut F,
    transmitter: &SignalTransmitter,
    restore: &mut RestoreMacro,
    raw: &str,
    manual_delay_ms: u64,
) -> Dispatched {
    let Some(command) = Command::parse(raw) else {
        warn!("unknown command payload {:?}", raw.trim());
        fx.report(StatusEvent::UnknownCommand);
        return Dispatched::Unknown;
    };

    debug!("dispatching {}", command.as_str());
    match command.action() {
        CommandAction::Send(code) => {
            transmitter.send_labeled(fx, code, command.as_str());
            Dispatched::Sent(command)
        }
        CommandAction::Restore => {
            restore.run(fx, transmitter, RestoreTrigger::Mqtt, manual_delay_ms);
            Dispatched::Restored
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingEffects;
    use pretty_assertions::assert_eq;

    fn run(raw: &str) -> (Dispatched, RecordingEffects, RestoreMacro) {
        let mut fx = RecordingEffects::default();
        let mut restore = RestoreMacro::new(3);
        let result = dispatch(
            &mut fx,
            &SignalTransmitter::new(40, 180),
            &mut restore,
            raw,
            500,
        );
        (result, fx, restore)
    }

    #[test]
    fn each_button_command_sends_its_code_once() {
        for command in Command::ALL {
            let CommandAction::Send(code) = command.action() else {
                continue;
            };

            let (result, fx, restore) = run(command.as_str());

            assert_eq!(result, Dispatched::Sent(command));
            assert_eq!(fx.frames(), vec![code, code]);
            assert_eq!(fx.statuses(), vec![format!("sent:{}", command.as_str())]);
            assert_eq!(restore.completed_runs(), 0);
        }
    }

    #[test]
    fn padded_mixed_case_temp_up() {
        let (result, fx, restore) = run("  Temp_Up  ");

        assert_eq!(result, Dispatched::Sent(Command::TempUp));
        assert_eq!(fx.statuses(), vec!["sent:temp_up".to_string()]);
        assert_eq!(restore.completed_runs(), 0);
    }

    #[test]
    fn restore_state_runs_macro_with_manual_delay() {
        let (result, fx, restore) = run("restore_state");

        assert_eq!(result, Dispatched::Restored);
        assert_eq!(restore.completed_runs(), 1);
        assert_eq!(fx.statuses().first().unwrap(), "restore:start:mqtt");
        assert_eq!(fx.frames_at()[0].0, 500);
    }

    #[test]
    fn unknown_tokens_report_error_without_ir() {
        for raw in ["frobnicate", "", "temp-up"] {
            let (result, fx, _) = run(raw);

            assert_eq!(result, Dispatched::Unknown);
            assert!(fx.frames().is_empty());
            assert_eq!(fx.statuses(), vec!["error:unknown_cmd".to_string()]);
        }
    }
}

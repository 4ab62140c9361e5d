use anyhow::Context;
use esp_idf_hal::{
    gpio::OutputPin,
    peripheral::Peripheral,
    rmt::{
        config::{CarrierConfig, DutyPercent, TransmitConfig},
        PinState, Pulse, PulseTicks, RmtChannel, TxRmtDriver, VariableLengthSignal,
    },
    units::FromValueType,
};
use log::{debug, warn};

use heater_bridge_common::{IrEmitter, PulseCode};

/// 80 MHz APB clock / 80 gives one tick per microsecond.
const IR_TICK_DIVIDER: u8 = 80;

enum IrBackend {
    Rmt(TxRmtDriver<'static>),
    Disabled,
}

pub struct IrTransmitter {
    backend: IrBackend,
    sent_frames: u64,
    failed_frames: u64,
}

impl IrTransmitter {
    pub fn new_with_carrier<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
        carrier_khz: u32,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: OutputPin,
    {
        let carrier = CarrierConfig::new()
            .frequency(carrier_khz.kHz().into())
            .carrier_level(PinState::High)
            .duty_percent(DutyPercent::new(33)?);

        let config = TransmitConfig::new()
            .clock_divider(IR_TICK_DIVIDER)
            .carrier(Some(carrier))
            .idle(Some(PinState::Low));

        let tx = TxRmtDriver::new(channel, pin, &config).context("failed to init RMT IR driver")?;

        Ok(Self {
            backend: IrBackend::Rmt(tx),
            sent_frames: 0,
            failed_frames: 0,
        })
    }

    pub fn disabled() -> Self {
        Self {
            backend: IrBackend::Disabled,
            sent_frames: 0,
            failed_frames: 0,
        }
    }

    fn send_timings(&mut self, timings: &[u16]) -> anyhow::Result<()> {
        let IrBackend::Rmt(tx) = &mut self.backend else {
            warn!("IR disabled, dropping frame with {} timings", timings.len());
            return Ok(());
        };

        let mut pulses = Vec::with_capacity(timings.len());
        for (index, duration) in timings.iter().enumerate() {
            let level = if index % 2 == 0 {
                PinState::High
            } else {
                PinState::Low
            };

            pulses.push(Pulse::new(
                level,
                PulseTicks::new(*duration).context("invalid IR pulse duration")?,
            ));
        }

        let pulse_refs: Vec<&Pulse> = pulses.iter().collect();
        let mut signal = VariableLengthSignal::with_capacity(pulses.len());
        signal
            .push(pulse_refs)
            .context("failed to convert IR timings to RMT signal")?;

        tx.start_blocking(&signal)
            .context("failed to transmit IR frame over RMT")?;
        Ok(())
    }
}

impl IrEmitter for IrTransmitter {
    fn emit(&mut self, code: PulseCode) {
        match self.send_timings(&code.timings()) {
            Ok(()) => {
                self.sent_frames = self.sent_frames.saturating_add(1);
                debug!("ir {code} sent (frame #{})", self.sent_frames);
            }
            Err(err) => {
                self.failed_frames = self.failed_frames.saturating_add(1);
                warn!(
                    "ir {code} failed ({} failures so far): {err:#}",
                    self.failed_frames
                );
            }
        }
    }
}

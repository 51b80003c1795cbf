//! The radio port: the per-radio state the link fabric operates on.
//!
//! Radio models own a [`RadioPort`] and expose it to the manager through
//! [`Model::as_radio_port`](crate::Model::as_radio_port). The fabric never
//! sees the models themselves, only ports: phy setup for the link budget,
//! the bounded queues, and the per-epoch receive budget.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::data::MacFrame;
use crate::time::SimTime;
use crate::{NodeId, RadioId};

/// Physical-layer family of a radio. Frames only flow between radios of the
/// same class.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum RadioClass {
    /// Narrowband LoRa (beacon/uplink/downlink control traffic).
    Lora,
    /// Wideband X-band imaging downlink.
    Xband,
    /// Inter-satellite link, wired by explicit peer ids.
    Isl,
}

impl RadioClass {
    /// Minimum SNR advantage for the capture effect (dB). Overlapping
    /// same-frequency arrivals within one epoch collide unless one exceeds
    /// the others by at least this margin.
    pub fn capture_margin_db(&self) -> f64 {
        6.0
    }
}

/// Physical-layer parameter set of one radio.
///
/// LoRa-specific fields are ignored by the X-band predicate and vice versa;
/// a single struct keeps the scenario `phy_setup` schema flat across radio
/// classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhySetup {
    pub frequency_hz: f64,
    pub bandwidth_hz: f64,
    /// LoRa spreading factor (7-12).
    pub spreading_factor: u8,
    /// LoRa coding rate denominator (5-8 for 4/5..4/8).
    pub coding_rate: u8,
    /// LoRa preamble length in symbols.
    pub preamble_symbols: u32,
    /// X-band symbol rate (baud).
    pub symbol_rate_baud: f64,
    /// X-band required SNR at the demodulator (dB).
    pub required_snr_db: f64,
    /// Transmit power (dBW).
    pub tx_power_dbw: f64,
    pub tx_antenna_gain_db: f64,
    pub tx_line_loss_db: f64,
    pub rx_antenna_gain_db: f64,
    pub rx_line_loss_db: f64,
    /// Receiver gain-to-temperature figure (dB/K).
    pub gain_to_temperature_db_k: f64,
    /// Lumped atmospheric/pointing/polarization loss (dB).
    pub atmosphere_loss_db: f64,
    /// Per-epoch transmission/reception budget in bits. Zero = unlimited.
    pub bits_allowed: u64,
}

impl Default for PhySetup {
    fn default() -> PhySetup {
        PhySetup {
            frequency_hz: 401_000_000.0,
            bandwidth_hz: 125_000.0,
            spreading_factor: 7,
            coding_rate: 5,
            preamble_symbols: 8,
            symbol_rate_baud: 1_000_000.0,
            required_snr_db: 4.0,
            tx_power_dbw: -9.0,
            tx_antenna_gain_db: 2.0,
            tx_line_loss_db: 1.0,
            rx_antenna_gain_db: 2.0,
            rx_line_loss_db: 1.0,
            gain_to_temperature_db_k: -15.0,
            atmosphere_loss_db: 1.8,
            bits_allowed: 0,
        }
    }
}

/// Why a frame never reached its receiver's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropReason {
    /// Receive queue full.
    QueueOverflow,
    /// Link budget below the success predicate.
    LinkFailure,
    /// Power model denied the transmit energy.
    PowerDenied,
    /// Same-frequency overlap without capture.
    Collision,
    /// Per-epoch bits budget or channel count exhausted.
    BudgetExceeded,
    /// No radio of compatible class/frequency at the candidate.
    NoCompatibleRadio,
    /// More than one matching radio at the candidate.
    AmbiguousRadio,
    /// Candidate node outside its simulation window.
    NotInWindow,
    /// Receive path disabled (by operation or power gating).
    ReceiverOff,
}

/// A frame delivered into a receive queue, with its link measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFrame {
    pub frame: MacFrame,
    pub from_node: NodeId,
    pub from_radio: RadioId,
    pub snr_db: f64,
    pub rssi_dbw: f64,
    pub received_at: SimTime,
}

/// A transmission staged with the link fabric during an epoch.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub source_node: NodeId,
    pub source_radio: RadioId,
    pub class: RadioClass,
    /// Transmit frequency at the moment of sending.
    pub frequency_hz: f64,
    /// Transmitter phy snapshot for the link budget.
    pub phy: PhySetup,
    pub frame: MacFrame,
    /// Candidate receivers: the FoV answer, or the ISL peer list.
    pub candidates: Vec<NodeId>,
    pub sent_at: SimTime,
}

/// Queue/phy state of one radio, owned by its model.
#[derive(Debug)]
pub struct RadioPort {
    pub radio_id: RadioId,
    pub class: RadioClass,
    pub phy: PhySetup,
    /// Whether the receive path is powered.
    pub rx_enabled: bool,
    /// Bound on each queue; zero = unbounded.
    pub queue_capacity: usize,
    /// Concurrent receive channels (X-band); 1 for LoRa and ISL.
    pub num_channels: u32,
    /// Declared ISL peers (empty for FoV-gated classes).
    pub peers: Vec<NodeId>,
    /// Bits accepted so far in the current epoch.
    pub bits_received_this_epoch: u64,
    rx_queue: VecDeque<ReceivedFrame>,
    tx_queue: VecDeque<MacFrame>,
}

impl RadioPort {
    pub fn new(radio_id: RadioId, class: RadioClass, phy: PhySetup, queue_capacity: usize) -> Self {
        RadioPort {
            radio_id,
            class,
            phy,
            rx_enabled: true,
            queue_capacity,
            num_channels: 1,
            peers: Vec::new(),
            bits_received_this_epoch: 0,
            rx_queue: VecDeque::new(),
            tx_queue: VecDeque::new(),
        }
    }

    /// Reset per-epoch accounting. Called once per epoch by the owner model.
    pub fn begin_epoch(&mut self) {
        self.bits_received_this_epoch = 0;
    }

    fn has_room(&self, len: usize) -> bool {
        self.queue_capacity == 0 || len < self.queue_capacity
    }

    /// Enqueue a received frame; `Err` when the bound is hit.
    pub fn push_rx(&mut self, frame: ReceivedFrame) -> Result<(), ReceivedFrame> {
        if self.has_room(self.rx_queue.len()) {
            self.rx_queue.push_back(frame);
            Ok(())
        } else {
            Err(frame)
        }
    }

    pub fn pop_rx(&mut self) -> Option<ReceivedFrame> {
        self.rx_queue.pop_front()
    }

    pub fn rx_len(&self) -> usize {
        self.rx_queue.len()
    }

    /// Enqueue a frame for transmission; `Err` when the bound is hit.
    pub fn push_tx(&mut self, frame: MacFrame) -> Result<(), MacFrame> {
        if self.has_room(self.tx_queue.len()) {
            self.tx_queue.push_back(frame);
            Ok(())
        } else {
            Err(frame)
        }
    }

    pub fn pop_tx(&mut self) -> Option<MacFrame> {
        self.tx_queue.pop_front()
    }

    pub fn tx_len(&self) -> usize {
        self.tx_queue.len()
    }

    /// Remaining receive budget for this epoch, in bits.
    pub fn bits_remaining(&self) -> u64 {
        if self.phy.bits_allowed == 0 {
            u64::MAX
        } else {
            self.phy.bits_allowed
                .saturating_sub(self.bits_received_this_epoch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MacFrame;

    fn beacon(id: u64) -> MacFrame {
        MacFrame::Beacon {
            beacon_id: id,
            source_radio: RadioId(1),
        }
    }

    #[test]
    fn bounded_queues_reject_overflow() {
        let mut port = RadioPort::new(RadioId(1), RadioClass::Lora, PhySetup::default(), 2);
        assert!(port.push_tx(beacon(1)).is_ok());
        assert!(port.push_tx(beacon(2)).is_ok());
        assert!(port.push_tx(beacon(3)).is_err());
        assert_eq!(port.tx_len(), 2);
        assert!(port.pop_tx().is_some());
        assert!(port.push_tx(beacon(3)).is_ok());
    }

    #[test]
    fn zero_capacity_means_unbounded() {
        let mut port = RadioPort::new(RadioId(1), RadioClass::Lora, PhySetup::default(), 0);
        for i in 0..1000 {
            assert!(port.push_tx(beacon(i)).is_ok());
        }
        assert_eq!(port.tx_len(), 1000);
    }

    #[test]
    fn bits_budget_resets_each_epoch() {
        let mut port = RadioPort::new(
            RadioId(1),
            RadioClass::Lora,
            PhySetup {
                bits_allowed: 1_000,
                ..PhySetup::default()
            },
            0,
        );
        port.bits_received_this_epoch = 900;
        assert_eq!(port.bits_remaining(), 100);
        port.begin_epoch();
        assert_eq!(port.bits_remaining(), 1_000);
    }

    #[test]
    fn phy_setup_deserializes_partially() {
        let phy: PhySetup =
            serde_json::from_str(r#"{"frequency_hz": 868e6, "spreading_factor": 9}"#).unwrap();
        assert_eq!(phy.frequency_hz, 868e6);
        assert_eq!(phy.spreading_factor, 9);
        assert_eq!(phy.coding_rate, PhySetup::default().coding_rate);
    }
}

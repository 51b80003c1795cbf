//! Link-budget math and per-class success predicates.
//!
//! Free-space path loss, EIRP, and the SNR chain follow the standard link
//! equation; the LoRa sensitivity and SNR-threshold tables are the
//! published per-spreading-factor figures.

use orbsim_common::{PhySetup, RadioClass, SimTime};

/// Boltzmann's constant in dBW/K/Hz.
const BOLTZMANN_DBW: f64 = -228.6;
/// Lumped pointing/polarization/cloud losses applied to the RSSI estimate.
const ATMOS_AND_OTHER_LOSS_DB: f64 = 6.0;

/// Free-space path loss in dB for a slant range and carrier frequency.
pub fn free_space_path_loss_db(distance_m: f64, frequency_hz: f64) -> f64 {
    let km = (distance_m / 1_000.0).max(1e-3);
    let ghz = frequency_hz / 1e9;
    20.0 * km.log10() + 20.0 * ghz.log10() + 92.45
}

/// Demodulation SNR threshold (dB) per LoRa spreading factor.
pub fn lora_snr_threshold_db(spreading_factor: u8) -> f64 {
    match spreading_factor {
        7 => -7.5,
        8 => -10.0,
        9 => -12.5,
        10 => -15.0,
        11 => -17.5,
        12 => -20.0,
        // Out-of-range SF: be conservative.
        _ => -10.0,
    }
}

/// Minimum detectable signal strength (dBm) per LoRa spreading factor.
pub fn lora_sensitivity_dbm(spreading_factor: u8) -> f64 {
    match spreading_factor {
        7 => -123.0,
        8 => -126.0,
        9 => -129.0,
        10 => -132.0,
        11 => -133.0,
        12 => -136.0,
        _ => -126.0,
    }
}

/// LoRa time on air for a payload, from the semtech symbol-count formula.
pub fn lora_time_on_air(phy: &PhySetup, payload_bytes: u64) -> SimTime {
    let sf = phy.spreading_factor as f64;
    let bw = phy.bandwidth_hz.max(1.0);
    let cr = phy.coding_rate as f64;
    let t_sym = 2.0_f64.powf(sf) / bw;
    let n_preamble = phy.preamble_symbols as f64 + 4.25;
    let pl = payload_bytes as f64;
    let payload_symbols = 8.0 + ((8.0 * pl - 4.0 * sf + 28.0).max(0.0) / (4.0 * sf)).ceil() * cr;
    SimTime::from_secs((n_preamble + payload_symbols) * t_sym)
}

/// Airtime of a frame on a given radio class.
pub fn time_on_air(class: RadioClass, phy: &PhySetup, payload_bytes: u64) -> SimTime {
    match class {
        RadioClass::Lora => lora_time_on_air(phy, payload_bytes),
        RadioClass::Xband | RadioClass::Isl => {
            let baud = phy.symbol_rate_baud.max(1.0);
            SimTime::from_secs(payload_bytes as f64 * 8.0 / baud)
        }
    }
}

/// Result of evaluating one link attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkOutcome {
    pub snr_db: f64,
    pub rssi_dbw: f64,
    pub success: bool,
}

/// Received signal strength (dBW) at the receiver.
fn received_signal_strength_dbw(tx: &PhySetup, rx: &PhySetup, fspl_db: f64) -> f64 {
    tx.tx_power_dbw + tx.tx_antenna_gain_db - tx.tx_line_loss_db - fspl_db
        - ATMOS_AND_OTHER_LOSS_DB
        + rx.rx_antenna_gain_db
        - rx.rx_line_loss_db
}

/// Signal-to-noise ratio (dB) at the receiver, from EIRP, path loss, the
/// receiver's gain-to-temperature figure, and the noise bandwidth.
fn snr_db(tx: &PhySetup, rx: &PhySetup, fspl_db: f64) -> f64 {
    let eirp = tx.tx_power_dbw + tx.tx_antenna_gain_db - tx.tx_line_loss_db;
    eirp - fspl_db - tx.atmosphere_loss_db + rx.gain_to_temperature_db_k - BOLTZMANN_DBW
        - 10.0 * rx.bandwidth_hz.max(1.0).log10()
}

/// Evaluate a single transmitter-receiver link at a slant range.
///
/// The success predicate is class-specific: LoRa demands both the per-SF
/// SNR threshold and the per-SF sensitivity floor; X-band and ISL demand
/// the configured demodulator SNR margin.
pub fn evaluate_link(
    class: RadioClass,
    tx: &PhySetup,
    rx: &PhySetup,
    distance_m: f64,
) -> LinkOutcome {
    let fspl = free_space_path_loss_db(distance_m, tx.frequency_hz);
    let snr = snr_db(tx, rx, fspl);
    let rssi = received_signal_strength_dbw(tx, rx, fspl);
    let success = match class {
        RadioClass::Lora => {
            let rssi_dbm = rssi + 30.0;
            snr >= lora_snr_threshold_db(tx.spreading_factor)
                && rssi_dbm > lora_sensitivity_dbm(tx.spreading_factor)
        }
        RadioClass::Xband | RadioClass::Isl => snr >= rx.required_snr_db,
    };
    LinkOutcome {
        snr_db: snr,
        rssi_dbw: rssi,
        success,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fspl_matches_reference_point() {
        // 500 km at 401 MHz: 53.98 - 7.94 + 92.45 = 138.49 dB.
        let fspl = free_space_path_loss_db(500_000.0, 401e6);
        assert!((fspl - 138.49).abs() < 0.05, "fspl {fspl}");
    }

    #[test]
    fn fspl_grows_six_db_per_distance_doubling() {
        let a = free_space_path_loss_db(500_000.0, 401e6);
        let b = free_space_path_loss_db(1_000_000.0, 401e6);
        assert!((b - a - 6.02).abs() < 0.01);
    }

    #[test]
    fn overhead_leo_lora_link_closes() {
        let phy = PhySetup::default();
        let outcome = evaluate_link(RadioClass::Lora, &phy, &phy, 500_000.0);
        assert!(outcome.success, "snr {} rssi {}", outcome.snr_db, outcome.rssi_dbw);
        assert!(outcome.snr_db > 10.0 && outcome.snr_db < 20.0);
    }

    #[test]
    fn distant_lora_link_fails_on_sensitivity() {
        let phy = PhySetup::default();
        let outcome = evaluate_link(RadioClass::Lora, &phy, &phy, 3_000_000.0);
        assert!(!outcome.success);
    }

    #[test]
    fn higher_sf_tolerates_weaker_links() {
        assert!(lora_snr_threshold_db(12) < lora_snr_threshold_db(7));
        assert!(lora_sensitivity_dbm(12) < lora_sensitivity_dbm(7));
    }

    #[test]
    fn lora_airtime_is_sub_second_at_sf7() {
        let phy = PhySetup::default();
        let toa = lora_time_on_air(&phy, 112);
        let secs = toa.as_secs_f64();
        assert!(secs > 0.05 && secs < 1.0, "toa {secs}");
    }

    #[test]
    fn xband_airtime_scales_with_symbol_rate() {
        let phy = PhySetup {
            symbol_rate_baud: 1_000_000.0,
            ..PhySetup::default()
        };
        let toa = time_on_air(RadioClass::Xband, &phy, 125_000);
        assert!((toa.as_secs_f64() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn xband_predicate_uses_required_snr() {
        let tx = PhySetup {
            frequency_hz: 8.2e9,
            bandwidth_hz: 10e6,
            tx_power_dbw: 3.0,
            tx_antenna_gain_db: 12.0,
            ..PhySetup::default()
        };
        let rx_good = PhySetup {
            required_snr_db: -20.0,
            gain_to_temperature_db_k: 5.0,
            bandwidth_hz: 10e6,
            ..PhySetup::default()
        };
        let rx_strict = PhySetup {
            required_snr_db: 60.0,
            ..rx_good.clone()
        };
        assert!(evaluate_link(RadioClass::Xband, &tx, &rx_good, 800_000.0).success);
        assert!(!evaluate_link(RadioClass::Xband, &tx, &rx_strict, 800_000.0).success);
    }
}

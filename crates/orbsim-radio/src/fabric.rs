//! The link fabric: epoch-scoped transmission resolution.
//!
//! Radios stage [`Transmission`]s during node advance; at the epoch
//! boundary the manager calls [`resolve_epoch`], which for every
//! transmission and candidate receiver:
//!
//! 1. finds the candidate's radio of the same class tuned to the same
//!    frequency (refusing ambiguous matches),
//! 2. computes the link budget from both phy setups and catalog geometry,
//! 3. applies the class success predicate,
//! 4. resolves same-receiver same-frequency overlaps by the capture
//!    effect, and
//! 5. delivers survivors into bounded receive queues, capped by the
//!    receiver's channel count and per-epoch bits budget.
//!
//! Every failure is a logged drop with a structured reason; nothing is
//! retried here.

use serde_json::json;

use orbsim_common::{
    find_node, find_node_mut, DropReason, EventKind, MacFrame, NodeId, ReceivedFrame, SharedWorld,
    SimTime, Topology, Transmission,
};

use crate::budget::evaluate_link;

/// Frequencies within this tolerance count as the same channel.
const FREQUENCY_TOLERANCE_HZ: f64 = 1.0;

/// Counters for one epoch of fabric resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FabricReport {
    pub attempts: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// One link attempt that passed the per-link success predicate.
struct Attempt {
    tx_index: usize,
    receiver: NodeId,
    freq_key: u64,
    source: NodeId,
    snr_db: f64,
    rssi_dbw: f64,
    survived: bool,
}

fn freq_key(frequency_hz: f64) -> u64 {
    frequency_hz.round() as u64
}

fn log_drop(
    topologies: &[Topology],
    at: NodeId,
    now: SimTime,
    frame: &MacFrame,
    reason: DropReason,
    detail: serde_json::Value,
) {
    if let Some(node) = find_node(topologies, at) {
        node.logger().event(
            now,
            EventKind::PacketDrop,
            json!({
                "frame": frame.kind_label(),
                "reason": reason,
                "detail": detail,
            }),
        );
    }
    metrics::counter!("orbsim_fabric_dropped_total").increment(1);
}

/// Resolve all transmissions staged during the epoch that ends at `now`.
pub fn resolve_epoch(
    now: SimTime,
    transmissions: &[Transmission],
    topologies: &mut [Topology],
    world: &SharedWorld,
) -> FabricReport {
    let mut report = FabricReport::default();
    let mut attempts: Vec<Attempt> = Vec::new();

    // Phase 1: per-link evaluation (immutable).
    for (tx_index, tx) in transmissions.iter().enumerate() {
        let tx_pos = match world.catalog.position_of(tx.source_node, tx.sent_at) {
            Ok(pos) => pos,
            Err(err) => {
                log_drop(
                    topologies,
                    tx.source_node,
                    now,
                    &tx.frame,
                    DropReason::LinkFailure,
                    json!({ "geometry": err.to_string() }),
                );
                report.dropped += 1;
                continue;
            }
        };

        for &candidate in &tx.candidates {
            if candidate == tx.source_node {
                continue;
            }
            report.attempts += 1;

            if !world.catalog.active_at(candidate, now) {
                log_drop(
                    topologies,
                    tx.source_node,
                    now,
                    &tx.frame,
                    DropReason::NotInWindow,
                    json!({ "candidate": candidate }),
                );
                report.dropped += 1;
                continue;
            }

            let Some(node) = find_node(topologies, candidate) else {
                log_drop(
                    topologies,
                    tx.source_node,
                    now,
                    &tx.frame,
                    DropReason::NoCompatibleRadio,
                    json!({ "candidate": candidate, "missing": true }),
                );
                report.dropped += 1;
                continue;
            };

            let matching: Vec<&orbsim_common::RadioPort> = node
                .radio_ports()
                .map(|(_, port)| port)
                .filter(|port| {
                    port.class == tx.class
                        && (port.phy.frequency_hz - tx.frequency_hz).abs() < FREQUENCY_TOLERANCE_HZ
                })
                .collect();

            let port = match matching.as_slice() {
                [] => {
                    log_drop(
                        topologies,
                        tx.source_node,
                        now,
                        &tx.frame,
                        DropReason::NoCompatibleRadio,
                        json!({ "candidate": candidate, "frequency_hz": tx.frequency_hz }),
                    );
                    report.dropped += 1;
                    continue;
                }
                [port] => port,
                _ => {
                    // (tag, frequency) ambiguity: refuse to pick.
                    log_drop(
                        topologies,
                        candidate,
                        now,
                        &tx.frame,
                        DropReason::AmbiguousRadio,
                        json!({ "frequency_hz": tx.frequency_hz }),
                    );
                    report.dropped += 1;
                    continue;
                }
            };

            if !port.rx_enabled {
                log_drop(
                    topologies,
                    candidate,
                    now,
                    &tx.frame,
                    DropReason::ReceiverOff,
                    json!({ "from": tx.source_node }),
                );
                report.dropped += 1;
                continue;
            }

            let rx_pos = match world.catalog.position_of(candidate, now) {
                Ok(pos) => pos,
                Err(err) => {
                    log_drop(
                        topologies,
                        candidate,
                        now,
                        &tx.frame,
                        DropReason::LinkFailure,
                        json!({ "geometry": err.to_string() }),
                    );
                    report.dropped += 1;
                    continue;
                }
            };

            let distance_m = tx_pos.distance(rx_pos);
            let outcome = evaluate_link(tx.class, &tx.phy, &port.phy, distance_m);
            if !outcome.success {
                log_drop(
                    topologies,
                    tx.source_node,
                    now,
                    &tx.frame,
                    DropReason::LinkFailure,
                    json!({
                        "candidate": candidate,
                        "distance_m": distance_m,
                        "snr_db": outcome.snr_db,
                        "rssi_dbw": outcome.rssi_dbw,
                    }),
                );
                report.dropped += 1;
                continue;
            }

            attempts.push(Attempt {
                tx_index,
                receiver: candidate,
                freq_key: freq_key(tx.frequency_hz),
                source: tx.source_node,
                snr_db: outcome.snr_db,
                rssi_dbw: outcome.rssi_dbw,
                survived: true,
            });
        }
    }

    // Phase 2: collision resolution per (receiver, frequency) group. All
    // frames of one source are serialized in time and never self-collide;
    // distinct sources overlap within the epoch and capture applies.
    let mut groups: std::collections::BTreeMap<(NodeId, u64), Vec<usize>> =
        std::collections::BTreeMap::new();
    for (i, attempt) in attempts.iter().enumerate() {
        groups
            .entry((attempt.receiver, attempt.freq_key))
            .or_default()
            .push(i);
    }
    for ((receiver, _freq), members) in &groups {
        let mut sources: Vec<NodeId> = members.iter().map(|&i| attempts[i].source).collect();
        sources.sort();
        sources.dedup();
        if sources.len() < 2 {
            continue;
        }
        // Strongest arrival per source decides the capture contest.
        let mut best: Vec<(NodeId, f64)> = sources
            .iter()
            .map(|&s| {
                let snr = members
                    .iter()
                    .filter(|&&i| attempts[i].source == s)
                    .map(|&i| attempts[i].snr_db)
                    .fold(f64::NEG_INFINITY, f64::max);
                (s, snr)
            })
            .collect();
        best.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let margin = transmissions[attempts[members[0]].tx_index]
            .class
            .capture_margin_db();
        let winner = if best[0].1 - best[1].1 >= margin {
            Some(best[0].0)
        } else {
            None
        };
        for &i in members {
            if Some(attempts[i].source) != winner {
                attempts[i].survived = false;
                let tx = &transmissions[attempts[i].tx_index];
                log_drop(
                    topologies,
                    *receiver,
                    now,
                    &tx.frame,
                    DropReason::Collision,
                    json!({
                        "from": attempts[i].source,
                        "snr_db": attempts[i].snr_db,
                        "contenders": sources.len(),
                    }),
                );
                report.dropped += 1;
            }
        }
    }

    // Phase 3: delivery in deterministic order (receiver, strongest first).
    let mut order: Vec<usize> = (0..attempts.len()).filter(|&i| attempts[i].survived).collect();
    order.sort_by(|&a, &b| {
        let (ra, rb) = (&attempts[a], &attempts[b]);
        ra.receiver
            .cmp(&rb.receiver)
            .then(
                rb.snr_db
                    .partial_cmp(&ra.snr_db)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(ra.tx_index.cmp(&rb.tx_index))
    });

    let mut channel_use: std::collections::BTreeMap<(NodeId, u64), u32> =
        std::collections::BTreeMap::new();

    for i in order {
        let attempt = &attempts[i];
        let tx = &transmissions[attempt.tx_index];
        let bits = tx.frame.size_bits();

        let Some(node) = find_node_mut(topologies, attempt.receiver) else {
            continue;
        };
        let logger = node.logger().clone();
        let Some((_, port)) = node.radio_ports_mut().find(|(_, port)| {
            port.class == tx.class
                && (port.phy.frequency_hz - tx.frequency_hz).abs() < FREQUENCY_TOLERANCE_HZ
        }) else {
            continue;
        };

        let channels = channel_use
            .entry((attempt.receiver, port.radio_id.0 as u64))
            .or_insert(0);
        if *channels >= port.num_channels || port.bits_remaining() < bits {
            logger.event(
                now,
                EventKind::PacketDrop,
                json!({
                    "frame": tx.frame.kind_label(),
                    "reason": DropReason::BudgetExceeded,
                    "from": attempt.source,
                }),
            );
            metrics::counter!("orbsim_fabric_dropped_total").increment(1);
            report.dropped += 1;
            continue;
        }

        let received = ReceivedFrame {
            frame: tx.frame.clone(),
            from_node: attempt.source,
            from_radio: tx.source_radio,
            snr_db: attempt.snr_db,
            rssi_dbw: attempt.rssi_dbw,
            received_at: now,
        };
        match port.push_rx(received) {
            Ok(()) => {
                *channels += 1;
                port.bits_received_this_epoch += bits;
                logger.event(
                    now,
                    EventKind::PacketRx,
                    json!({
                        "frame": tx.frame.kind_label(),
                        "from": attempt.source,
                        "snr_db": attempt.snr_db,
                        "rssi_dbw": attempt.rssi_dbw,
                        "size_bytes": tx.frame.size_bytes(),
                    }),
                );
                metrics::counter!("orbsim_fabric_delivered_total").increment(1);
                report.delivered += 1;
            }
            Err(_) => {
                logger.event(
                    now,
                    EventKind::PacketDrop,
                    json!({
                        "frame": tx.frame.kind_label(),
                        "reason": DropReason::QueueOverflow,
                        "from": attempt.source,
                    }),
                );
                metrics::counter!("orbsim_fabric_dropped_total").increment(1);
                report.dropped += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbsim_common::{
        GeoCatalog, GeoEntry, LogLevel, MemorySink, Node, NodeKind, NodeLogger, PassTableCache,
        PhySetup, PositionSource, RadioClass, RadioId, SimClock, TopologyId,
    };
    use orbsim_geo::frame::Vec3;
    use orbsim_geo::{GroundPoint, EARTH_RADIUS_M};
    use std::sync::Arc;

    use crate::core::RadioConfig;
    use crate::models::ModelLoraRadio;

    fn clock() -> SimClock {
        SimClock::new("2022-10-17 12:00:00", "2022-10-17 13:00:00", 1.0).unwrap()
    }

    fn world_with(entries: Vec<(NodeId, GeoEntry)>) -> SharedWorld {
        let clock = clock();
        let mut catalog = GeoCatalog::new(clock);
        for (id, entry) in entries {
            catalog.insert(id, entry);
        }
        SharedWorld {
            clock,
            catalog: Arc::new(catalog),
            passes: Arc::new(PassTableCache::new()),
        }
    }

    fn entry(kind: NodeKind, source: PositionSource) -> GeoEntry {
        GeoEntry {
            kind,
            topology: TopologyId(0),
            window: (SimTime::ZERO, SimTime::from_secs(3600.0)),
            source,
        }
    }

    fn node_with_radio(id: NodeId, kind: NodeKind, sink: Arc<MemorySink>, phy: PhySetup) -> Node {
        let mut node = Node::new(
            id,
            kind,
            "GroundStationBasic",
            TopologyId(0),
            (SimTime::ZERO, SimTime::from_secs(3600.0)),
            SimTime::from_secs(1.0),
            NodeLogger::new(id, LogLevel::All, clock(), sink),
            7,
        );
        node.push_model(Box::new(ModelLoraRadio::new(
            RadioConfig {
                phy_setup: phy,
                ..RadioConfig::default()
            },
            id,
        )));
        node
    }

    fn beacon(source: RadioId) -> MacFrame {
        MacFrame::Beacon {
            beacon_id: 1,
            source_radio: source,
        }
    }

    fn lora_tx(source: NodeId, candidates: Vec<NodeId>, phy: PhySetup) -> Transmission {
        Transmission {
            source_node: source,
            source_radio: RadioId(source.0),
            class: RadioClass::Lora,
            frequency_hz: phy.frequency_hz,
            phy,
            frame: beacon(RadioId(source.0)),
            candidates,
            sent_at: SimTime::ZERO,
        }
    }

    /// Satellite fixed 500 km above an equatorial ground station.
    fn overhead_world(sat: NodeId, gs: NodeId) -> SharedWorld {
        world_with(vec![
            (
                sat,
                entry(
                    NodeKind::Sat,
                    PositionSource::Fixed {
                        ecef: Vec3::new(EARTH_RADIUS_M + 500_000.0, 0.0, 0.0),
                        sunlit: true,
                    },
                ),
            ),
            (
                gs,
                entry(
                    NodeKind::Gs,
                    PositionSource::Ground(GroundPoint::new(0.0, 0.0, 0.0)),
                ),
            ),
        ])
    }

    #[test]
    fn successful_link_delivers_into_rx_queue() {
        let sat = NodeId(1);
        let gs = NodeId(2);
        let world = overhead_world(sat, gs);
        let sink = Arc::new(MemorySink::new());
        let mut topo = Topology::new(TopologyId(0), "t");
        topo.push_node(node_with_radio(gs, NodeKind::Gs, sink.clone(), PhySetup::default()));
        let mut topologies = vec![topo];

        let report = resolve_epoch(
            SimTime::ZERO,
            &[lora_tx(sat, vec![gs], PhySetup::default())],
            &mut topologies,
            &world,
        );
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 0);
        let node = topologies[0].node_mut(gs).unwrap();
        let (_, port) = node.radio_ports_mut().next().unwrap();
        assert_eq!(port.rx_len(), 1);
        assert_eq!(sink.of_kind(EventKind::PacketRx).len(), 1);
    }

    #[test]
    fn frequency_mismatch_is_no_compatible_radio() {
        let sat = NodeId(1);
        let gs = NodeId(2);
        let world = overhead_world(sat, gs);
        let sink = Arc::new(MemorySink::new());
        let mut topo = Topology::new(TopologyId(0), "t");
        topo.push_node(node_with_radio(gs, NodeKind::Gs, sink.clone(), PhySetup::default()));
        let mut topologies = vec![topo];

        let tx_phy = PhySetup {
            frequency_hz: 868e6,
            ..PhySetup::default()
        };
        let report = resolve_epoch(
            SimTime::ZERO,
            &[lora_tx(sat, vec![gs], tx_phy)],
            &mut topologies,
            &world,
        );
        assert_eq!(report.delivered, 0);
        assert_eq!(report.dropped, 1);
    }

    #[test]
    fn two_transmitters_same_frequency_collide_without_capture() {
        let sat_a = NodeId(1);
        let sat_b = NodeId(2);
        let gs = NodeId(3);
        let mut world_entries = vec![(
            gs,
            entry(
                NodeKind::Gs,
                PositionSource::Ground(GroundPoint::new(0.0, 0.0, 0.0)),
            ),
        )];
        // Both satellites at the same altitude: equal SNR, no capture.
        for sat in [sat_a, sat_b] {
            world_entries.push((
                sat,
                entry(
                    NodeKind::Sat,
                    PositionSource::Fixed {
                        ecef: Vec3::new(EARTH_RADIUS_M + 500_000.0, 0.0, 0.0),
                        sunlit: true,
                    },
                ),
            ));
        }
        let world = world_with(world_entries);
        let sink = Arc::new(MemorySink::new());
        let mut topo = Topology::new(TopologyId(0), "t");
        topo.push_node(node_with_radio(gs, NodeKind::Gs, sink.clone(), PhySetup::default()));
        let mut topologies = vec![topo];

        let report = resolve_epoch(
            SimTime::ZERO,
            &[
                lora_tx(sat_a, vec![gs], PhySetup::default()),
                lora_tx(sat_b, vec![gs], PhySetup::default()),
            ],
            &mut topologies,
            &world,
        );
        assert_eq!(report.delivered, 0);
        assert_eq!(report.dropped, 2);
        let drops = sink.of_kind(EventKind::PacketDrop);
        assert_eq!(drops.len(), 2);
        assert!(drops
            .iter()
            .all(|r| r.payload["reason"] == serde_json::json!("collision")));
    }

    #[test]
    fn capture_lets_much_stronger_transmitter_through() {
        let near = NodeId(1);
        let far = NodeId(2);
        let gs = NodeId(3);
        let world = world_with(vec![
            (
                near,
                entry(
                    NodeKind::Sat,
                    PositionSource::Fixed {
                        ecef: Vec3::new(EARTH_RADIUS_M + 400_000.0, 0.0, 0.0),
                        sunlit: true,
                    },
                ),
            ),
            (
                far,
                entry(
                    NodeKind::Sat,
                    // 4x the slant range: 12 dB weaker, beyond the 6 dB margin.
                    PositionSource::Fixed {
                        ecef: Vec3::new(EARTH_RADIUS_M + 1_600_000.0, 0.0, 0.0),
                        sunlit: true,
                    },
                ),
            ),
            (
                gs,
                entry(
                    NodeKind::Gs,
                    PositionSource::Ground(GroundPoint::new(0.0, 0.0, 0.0)),
                ),
            ),
        ]);
        let sink = Arc::new(MemorySink::new());
        // Strong phy so the far link still closes on its own.
        let strong = PhySetup {
            tx_power_dbw: 0.0,
            tx_antenna_gain_db: 6.0,
            rx_antenna_gain_db: 6.0,
            ..PhySetup::default()
        };
        let mut topo = Topology::new(TopologyId(0), "t");
        topo.push_node(node_with_radio(gs, NodeKind::Gs, sink.clone(), strong.clone()));
        let mut topologies = vec![topo];

        let report = resolve_epoch(
            SimTime::ZERO,
            &[
                lora_tx(near, vec![gs], strong.clone()),
                lora_tx(far, vec![gs], strong),
            ],
            &mut topologies,
            &world,
        );
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        let rx = sink.of_kind(EventKind::PacketRx);
        assert_eq!(rx[0].payload["from"], serde_json::json!(near));
    }

    #[test]
    fn queue_overflow_is_dropped_and_logged() {
        let sat = NodeId(1);
        let gs = NodeId(2);
        let world = overhead_world(sat, gs);
        let sink = Arc::new(MemorySink::new());
        let mut node = Node::new(
            gs,
            NodeKind::Gs,
            "GroundStationBasic",
            TopologyId(0),
            (SimTime::ZERO, SimTime::from_secs(3600.0)),
            SimTime::from_secs(1.0),
            NodeLogger::new(gs, LogLevel::All, clock(), sink.clone()),
            7,
        );
        node.push_model(Box::new(ModelLoraRadio::new(
            RadioConfig {
                queue_size: 1,
                ..RadioConfig::default()
            },
            gs,
        )));
        // Pre-fill the single rx slot.
        let (_, port) = node.radio_ports_mut().next().unwrap();
        port.push_rx(ReceivedFrame {
            frame: beacon(RadioId(9)),
            from_node: NodeId(9),
            from_radio: RadioId(9),
            snr_db: 0.0,
            rssi_dbw: -120.0,
            received_at: SimTime::ZERO,
        })
        .unwrap();
        let mut topo = Topology::new(TopologyId(0), "t");
        topo.push_node(node);
        let mut topologies = vec![topo];

        let report = resolve_epoch(
            SimTime::ZERO,
            &[lora_tx(sat, vec![gs], PhySetup::default())],
            &mut topologies,
            &world,
        );
        assert_eq!(report.delivered, 0);
        assert_eq!(report.dropped, 1);
        let drops = sink.of_kind(EventKind::PacketDrop);
        assert_eq!(drops[0].payload["reason"], serde_json::json!("queue-overflow"));
    }

    #[test]
    fn out_of_window_candidate_never_receives() {
        let sat = NodeId(1);
        let gs = NodeId(2);
        let clock = clock();
        let mut catalog = GeoCatalog::new(clock);
        catalog.insert(
            sat,
            entry(
                NodeKind::Sat,
                PositionSource::Fixed {
                    ecef: Vec3::new(EARTH_RADIUS_M + 500_000.0, 0.0, 0.0),
                    sunlit: true,
                },
            ),
        );
        catalog.insert(
            gs,
            GeoEntry {
                kind: NodeKind::Gs,
                topology: TopologyId(0),
                // Window already over at t=0... window is [10, 20].
                window: (SimTime::from_secs(10.0), SimTime::from_secs(20.0)),
                source: PositionSource::Ground(GroundPoint::new(0.0, 0.0, 0.0)),
            },
        );
        let world = SharedWorld {
            clock,
            catalog: Arc::new(catalog),
            passes: Arc::new(PassTableCache::new()),
        };
        let sink = Arc::new(MemorySink::new());
        let mut topo = Topology::new(TopologyId(0), "t");
        topo.push_node(node_with_radio(gs, NodeKind::Gs, sink, PhySetup::default()));
        let mut topologies = vec![topo];

        let report = resolve_epoch(
            SimTime::ZERO,
            &[lora_tx(sat, vec![gs], PhySetup::default())],
            &mut topologies,
            &world,
        );
        assert_eq!(report.delivered, 0);
        assert_eq!(report.dropped, 1);
    }
}

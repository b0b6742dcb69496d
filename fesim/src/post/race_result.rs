use crate::core::events::{RaceEvent, TimedEvent};
use crate::post::standings::StandingsSnapshot;
use serde::Serialize;
use std::fmt::Write;

/// AgentTag pairs a competitor id with the driver initials for
/// post-processing the results.
#[derive(Debug, Serialize, Clone)]
pub struct AgentTag {
    pub agent_id: u32,
    pub initials: String,
}

/// RaceResult contains all race information that is required for
/// post-processing: the final classification, the per-lap time table, the
/// full ordered event log and the deterministic replay log (tick indices at
/// which events fired).
#[derive(Debug, Serialize, Clone)]
pub struct RaceResult {
    pub track_name: String,
    pub num_laps: u32,
    pub tags: Vec<AgentTag>,
    /// Lap times per agent (outer: agents in id order; inner: lap 1..N).
    pub laptimes: Vec<Vec<Option<f64>>>,
    pub standings: StandingsSnapshot,
    pub events: Vec<TimedEvent>,
    pub event_ticks: Vec<u64>,
}

impl RaceResult {
    /// The method assembles the lap-time table from the ordered event log.
    pub fn build(
        track_name: String,
        num_laps: u32,
        tags: Vec<AgentTag>,
        standings: StandingsSnapshot,
        events: Vec<TimedEvent>,
        event_ticks: Vec<u64>,
    ) -> RaceResult {
        let mut laptimes = vec![vec![None; num_laps as usize]; tags.len()];
        for timed in events.iter() {
            if let RaceEvent::LapComplete {
                agent,
                lap,
                lap_time,
            } = &timed.event
            {
                if let Some(idx) = tags.iter().position(|tag| tag.agent_id == *agent) {
                    if (1..=num_laps).contains(lap) {
                        laptimes[idx][*lap as usize - 1] = Some(*lap_time);
                    }
                }
            }
        }

        RaceResult {
            track_name,
            num_laps,
            tags,
            laptimes,
            standings,
            events,
            event_ticks,
        }
    }

    /// print_standings prints the final classification to the console output.
    pub fn print_standings(&self) {
        println!("RESULT: Final classification ({})", self.track_name);
        for entry in self.standings.entries.iter() {
            let mut line = String::new();
            write!(
                &mut line,
                "{:3}. {:4} (#{:<2})  lap {:3}",
                entry.position, entry.initials, entry.agent_id, entry.current_lap
            )
            .unwrap();
            if entry.active {
                if entry.interval_to_leader > 0.0 && entry.interval_to_leader.is_finite() {
                    write!(&mut line, "  +{:7.3}s", entry.interval_to_leader).unwrap();
                }
            } else {
                write!(&mut line, "  DNF ({:?})", entry.dnf_reason).unwrap();
            }
            if let Some(best) = entry.best_lap_time {
                write!(&mut line, "  best {:7.3}s", best).unwrap();
            }
            println!("{}", line);
        }
    }

    /// write_laptimes_csv writes the lap-time table to a CSV file and returns
    /// the path of the written file.
    pub fn write_laptimes_csv(&self, path: &std::path::Path) -> anyhow::Result<String> {
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec!["lap".to_string()];
        header.extend(
            self.tags
                .iter()
                .map(|tag| format!("{} (#{})", tag.initials, tag.agent_id)),
        );
        writer.write_record(&header)?;

        for lap in 0..self.num_laps as usize {
            let mut record = vec![format!("{}", lap + 1)];
            for agent_idx in 0..self.tags.len() {
                record.push(match self.laptimes[agent_idx][lap] {
                    Some(lap_time) => format!("{:.3}", lap_time),
                    None => String::new(),
                });
            }
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(path.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standings() -> StandingsSnapshot {
        StandingsSnapshot {
            t: 120.0,
            leader_lap: 2,
            entries: Vec::new(),
        }
    }

    #[test]
    fn lap_table_is_built_from_events() {
        let tags = vec![
            AgentTag {
                agent_id: 3,
                initials: "AAA".to_string(),
            },
            AgentTag {
                agent_id: 7,
                initials: "BBB".to_string(),
            },
        ];
        let events = vec![
            TimedEvent {
                t: 61.0,
                step_index: 6100,
                event: RaceEvent::LapComplete {
                    agent: 7,
                    lap: 1,
                    lap_time: 61.0,
                },
            },
            TimedEvent {
                t: 62.5,
                step_index: 6250,
                event: RaceEvent::LapComplete {
                    agent: 3,
                    lap: 1,
                    lap_time: 62.5,
                },
            },
            TimedEvent {
                t: 121.0,
                step_index: 12100,
                event: RaceEvent::LapComplete {
                    agent: 7,
                    lap: 2,
                    lap_time: 60.0,
                },
            },
        ];

        let result = RaceResult::build(
            "test".to_string(),
            2,
            tags,
            standings(),
            events,
            vec![6100, 6250, 12100],
        );
        assert_eq!(result.laptimes[0][0], Some(62.5));
        assert_eq!(result.laptimes[1][0], Some(61.0));
        assert_eq!(result.laptimes[1][1], Some(60.0));
        assert_eq!(result.laptimes[0][1], None);
        assert_eq!(result.event_ticks.len(), 3);
    }

    #[test]
    fn laps_beyond_the_race_distance_are_ignored() {
        let tags = vec![AgentTag {
            agent_id: 1,
            initials: "AAA".to_string(),
        }];
        let events = vec![TimedEvent {
            t: 200.0,
            step_index: 20000,
            event: RaceEvent::LapComplete {
                agent: 1,
                lap: 5,
                lap_time: 59.0,
            },
        }];
        let result = RaceResult::build("test".to_string(), 2, tags, standings(), events, vec![]);
        assert!(result.laptimes[0].iter().all(|lap_time| lap_time.is_none()));
    }
}

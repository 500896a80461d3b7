//! Read-only query commands for operators.

use crate::core::error::CommandError;

use super::EngineState;

/// A parsed query command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VesselCommand {
    /// Every live vessel with its size, position, and state
    List,
    /// Measured ticks per second
    TickRate,
    /// Pose of one vessel, by name
    Position(String),
    /// Available commands
    Help,
}

const HELP: &str = "commands: list | tps | pos <name> | help";

impl VesselCommand {
    /// Parses one command line. Names and aliases are case-insensitive.
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let mut words = input.split_whitespace();
        let Some(command) = words.next() else {
            return Err(CommandError::Unknown(String::new()));
        };
        match command.to_ascii_lowercase().as_str() {
            "list" | "ls" => Ok(VesselCommand::List),
            "tps" | "tickrate" => Ok(VesselCommand::TickRate),
            "pos" | "position" => {
                let name = words.collect::<Vec<_>>().join(" ");
                if name.is_empty() {
                    Err(CommandError::MissingArgument("name"))
                } else {
                    Ok(VesselCommand::Position(name))
                }
            }
            "help" | "?" => Ok(VesselCommand::Help),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }

    /// Runs the command and returns its report.
    pub fn execute(&self, engine: &EngineState) -> String {
        match self {
            VesselCommand::List => {
                let mut report = format!("{} vessel(s)", engine.vessel_count());
                for vessel in engine.vessels() {
                    let position = vessel.pose().position;
                    report.push_str(&format!(
                        "\n  #{} {}: {} voxels at ({:.1}, {:.1}, {:.1}), {:?}",
                        vessel.id(),
                        vessel.name(),
                        vessel.voxel_count(),
                        position.x,
                        position.y,
                        position.z,
                        vessel.lifecycle()
                    ));
                }
                report
            }
            VesselCommand::TickRate => format!(
                "{:.1} ticks per second (target {:.1})",
                engine.tick_rate(),
                1.0 / engine.config.tick_seconds
            ),
            VesselCommand::Position(name) => match engine.vessel_by_name(name) {
                Some(vessel) => {
                    let pose = vessel.pose();
                    format!(
                        "{} is at ({:.2}, {:.2}, {:.2}), pitch {:.1}, yaw {:.1}, roll {:.1}",
                        name, pose.position.x, pose.position.y, pose.position.z, pose.pitch, pose.yaw, pose.roll
                    )
                }
                None => format!("no vessel named '{}'", name),
            },
            VesselCommand::Help => HELP.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_state::config::EngineConfig;
    use crate::engine_state::voxels::world::WorldSide;

    #[test]
    fn parses_commands_and_aliases() {
        assert_eq!(VesselCommand::parse("LIST"), Ok(VesselCommand::List));
        assert_eq!(VesselCommand::parse(" tps "), Ok(VesselCommand::TickRate));
        assert_eq!(
            VesselCommand::parse("pos Big Skiff"),
            Ok(VesselCommand::Position("Big Skiff".into()))
        );
        assert_eq!(VesselCommand::parse("pos"), Err(CommandError::MissingArgument("name")));
        assert_eq!(VesselCommand::parse("fly"), Err(CommandError::Unknown("fly".into())));
        assert_eq!(VesselCommand::parse(""), Err(CommandError::Unknown(String::new())));
    }

    #[test]
    fn reports_on_an_empty_engine() {
        let engine = EngineState::new(EngineConfig::default(), WorldSide::Authoritative);
        assert_eq!(VesselCommand::List.execute(&engine), "0 vessel(s)");
        assert_eq!(
            VesselCommand::TickRate.execute(&engine),
            "0.0 ticks per second (target 20.0)"
        );
        assert_eq!(
            VesselCommand::Position("ghost".into()).execute(&engine),
            "no vessel named 'ghost'"
        );
    }
}

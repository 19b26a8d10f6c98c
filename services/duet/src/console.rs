//! Line-oriented console commands.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Join,
    Leave,
    ToggleMic,
    ToggleCamera,
    Agent(bool),
    PushToTalk(bool),
    TalkDown,
    TalkUp,
    Playback(bool),
    Interrupt,
    Say(String),
    NetworkDrop,
    PeerVideo { user_id: u32, on: bool },
    Status,
    Log,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  join | leave            join or leave the conference
  mic | cam               toggle conference microphone / camera
  agent on|off            connect or drop the voice agent by hand
  ptt on|off              push-to-talk or server voice activity
  down | up               press / release the talk button
  playback on|off         agent audio playback
  interrupt               cut the agent off
  say <text>              send a text message to the agent
  drop                    simulate a conference network drop
  peer <id> on|off        simulate a peer starting / stopping video
  status | log | help | quit";

fn on_off(arg: Option<&str>) -> Result<bool, String> {
    match arg {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        other => Err(format!("expected on|off, got {:?}", other.unwrap_or(""))),
    }
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let line = line.trim();
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let mut args = rest.split_whitespace();

    let command = match head {
        "join" => ConsoleCommand::Join,
        "leave" => ConsoleCommand::Leave,
        "mic" => ConsoleCommand::ToggleMic,
        "cam" => ConsoleCommand::ToggleCamera,
        "agent" => ConsoleCommand::Agent(on_off(args.next())?),
        "ptt" => ConsoleCommand::PushToTalk(on_off(args.next())?),
        "down" => ConsoleCommand::TalkDown,
        "up" => ConsoleCommand::TalkUp,
        "playback" => ConsoleCommand::Playback(on_off(args.next())?),
        "interrupt" => ConsoleCommand::Interrupt,
        "say" => {
            if rest.is_empty() {
                return Err("say needs some text".to_string());
            }
            ConsoleCommand::Say(rest.to_string())
        }
        "drop" => ConsoleCommand::NetworkDrop,
        "peer" => {
            let user_id = args
                .next()
                .and_then(|id| id.parse().ok())
                .ok_or_else(|| "peer needs a numeric user id".to_string())?;
            ConsoleCommand::PeerVideo {
                user_id,
                on: on_off(args.next())?,
            }
        }
        "status" => ConsoleCommand::Status,
        "log" => ConsoleCommand::Log,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        "" => return Err("empty command".to_string()),
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toggles_and_text() {
        assert_eq!(parse_command("agent on"), Ok(ConsoleCommand::Agent(true)));
        assert_eq!(parse_command("ptt off"), Ok(ConsoleCommand::PushToTalk(false)));
        assert_eq!(parse_command(" playback on "), Ok(ConsoleCommand::Playback(true)));
        assert_eq!(
            parse_command("say  hello   there"),
            Ok(ConsoleCommand::Say("hello   there".to_string()))
        );
        assert_eq!(
            parse_command("peer 12 off"),
            Ok(ConsoleCommand::PeerVideo {
                user_id: 12,
                on: false
            })
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_command("ptt maybe").is_err());
        assert!(parse_command("say").is_err());
        assert!(parse_command("peer x on").is_err());
        assert!(parse_command("dance").is_err());
        assert!(parse_command("   ").is_err());
    }
}

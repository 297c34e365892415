use thiserror::Error;

/// One line typed at the pre-join prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Name(String),
    Mic(bool),
    Cam(bool),
    /// `None` selects the system default.
    MicDevice(Option<String>),
    CamDevice(Option<String>),
    Blur(bool),
    Devices,
    State,
    Join,
    Quit,
    Help,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("unknown command: {0} (try `help`)")]
    Unknown(String),
    #[error("`{0}` expects on or off")]
    ExpectedSwitch(&'static str),
}

pub const HELP: &str = "\
commands:
  name <text>          set the display name (may be empty)
  mic on|off           enable or disable the microphone
  cam on|off           enable or disable the camera
  mic-device [id]      pick a microphone, no id for the default
  cam-device [id]      pick a camera, no id for the default
  blur on|off          toggle background blur
  devices              list capture devices
  state                show current choices and preview
  join                 enter the room
  quit                 leave without joining";

pub fn parse(line: &str) -> Result<ConsoleCommand, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word {
        "name" => Ok(ConsoleCommand::Name(rest.to_string())),
        "mic" => switch("mic", rest).map(ConsoleCommand::Mic),
        "cam" => switch("cam", rest).map(ConsoleCommand::Cam),
        "blur" => switch("blur", rest).map(ConsoleCommand::Blur),
        "mic-device" => Ok(ConsoleCommand::MicDevice(device_id(rest))),
        "cam-device" => Ok(ConsoleCommand::CamDevice(device_id(rest))),
        "devices" => Ok(ConsoleCommand::Devices),
        "state" => Ok(ConsoleCommand::State),
        "join" => Ok(ConsoleCommand::Join),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        "help" | "?" => Ok(ConsoleCommand::Help),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

fn switch(command: &'static str, arg: &str) -> Result<bool, ParseError> {
    match arg {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(ParseError::ExpectedSwitch(command)),
    }
}

fn device_id(arg: &str) -> Option<String> {
    match arg {
        "" | "default" => None,
        id => Some(id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_keeps_inner_spaces() {
        assert_eq!(
            parse("name  Alice Martin "),
            Ok(ConsoleCommand::Name("Alice Martin".into()))
        );
        assert_eq!(parse("name"), Ok(ConsoleCommand::Name(String::new())));
    }

    #[test]
    fn switches() {
        assert_eq!(parse("mic off"), Ok(ConsoleCommand::Mic(false)));
        assert_eq!(parse("cam on"), Ok(ConsoleCommand::Cam(true)));
        assert_eq!(parse("blur on"), Ok(ConsoleCommand::Blur(true)));
        assert_eq!(parse("mic maybe"), Err(ParseError::ExpectedSwitch("mic")));
        assert_eq!(parse("cam"), Err(ParseError::ExpectedSwitch("cam")));
    }

    #[test]
    fn device_selection_defaults() {
        assert_eq!(
            parse("cam-device cam-2"),
            Ok(ConsoleCommand::CamDevice(Some("cam-2".into())))
        );
        assert_eq!(parse("mic-device"), Ok(ConsoleCommand::MicDevice(None)));
        assert_eq!(parse("mic-device default"), Ok(ConsoleCommand::MicDevice(None)));
    }

    #[test]
    fn bare_commands() {
        assert_eq!(parse("  join "), Ok(ConsoleCommand::Join));
        assert_eq!(parse("exit"), Ok(ConsoleCommand::Quit));
        assert_eq!(parse("devices"), Ok(ConsoleCommand::Devices));
        assert_eq!(parse("state"), Ok(ConsoleCommand::State));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse("   "), Err(ParseError::Empty));
        assert_eq!(parse("dance"), Err(ParseError::Unknown("dance".into())));
    }
}

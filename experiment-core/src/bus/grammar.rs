#![allow(clippy::module_name_repetitions)]

//! Parser for command bus lines.
//!
//! A directive line is exactly two whitespace-separated words. The line is
//! first split into words with `winnow`, then each word is decoded on its own
//! so errors can name the offending token.

use thiserror::Error;
use winnow::ascii::{dec_uint, space0, space1};
use winnow::combinator::{alt, eof, opt, preceded, terminated};
use winnow::ModalResult;
use winnow::prelude::*;
use winnow::token::take_while;

use super::{Directive, LedColor, RobotCommand, RobotId, Subscription, Topic};

/// Keyword opening the subscriber handshake line.
pub const SUBSCRIBE_KEYWORD: &str = "subscribe";

/// Failures raised while decoding a bus line.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ParseError {
    #[error("empty directive")]
    Empty,
    #[error("directive `{0}` is missing a command")]
    MissingCommand(String),
    #[error("unknown topic `{0}`")]
    UnknownTopic(String),
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("led index `{0}` is outside 0..=4")]
    InvalidLed(String),
    #[error("unexpected trailing input `{0}`")]
    TrailingInput(String),
    #[error("expected `subscribe <topic>...`, found `{0}`")]
    InvalidHandshake(String),
}

fn word<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    take_while(1.., |c: char| !c.is_ascii_whitespace()).parse_next(input)
}

/// Splits a line into `(topic, command, rest)` words.
fn directive_words<'s>(input: &mut &'s str) -> ModalResult<(&'s str, Option<&'s str>)> {
    let topic = preceded(space0, word).parse_next(input)?;
    let command = opt(preceded(space1, word)).parse_next(input)?;
    let _ = space0.parse_next(input)?;
    Ok((topic, command))
}

fn topic(input: &mut &str) -> ModalResult<Topic> {
    terminated(
        alt((
            "all".value(Topic::All),
            "led".value(Topic::Led),
            dec_uint.map(|raw: u16| Topic::Robot(RobotId(raw))),
        )),
        eof,
    )
    .parse_next(input)
}

fn robot_command(input: &mut &str) -> ModalResult<RobotCommand> {
    terminated(
        alt((
            "on".value(RobotCommand::On),
            "off".value(RobotCommand::Off),
            "pause".value(RobotCommand::Pause),
            "go".value(RobotCommand::Go),
        )),
        eof,
    )
    .parse_next(input)
}

fn led_index(input: &mut &str) -> ModalResult<u8> {
    terminated(dec_uint, eof).parse_next(input)
}

fn decode_topic(raw: &str) -> Result<Topic, ParseError> {
    let mut input = raw;
    topic
        .parse_next(&mut input)
        .map_err(|_| ParseError::UnknownTopic(raw.to_string()))
}

/// Decodes one `<topic> <command>` line.
///
/// # Errors
///
/// Returns [`ParseError`] when the line does not hold exactly one known topic
/// followed by a command valid for that topic.
pub fn parse_directive(line: &str) -> Result<Directive, ParseError> {
    let mut input = line.trim_end_matches(['\r', '\n']);
    if input.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let (topic_word, command_word) =
        directive_words(&mut input).map_err(|_| ParseError::Empty)?;
    if !input.is_empty() {
        return Err(ParseError::TrailingInput(input.trim().to_string()));
    }
    let topic = decode_topic(topic_word)?;
    let Some(command_word) = command_word else {
        return Err(ParseError::MissingCommand(topic_word.to_string()));
    };

    let mut command_input = command_word;
    match topic {
        Topic::Led => led_index
            .parse_next(&mut command_input)
            .ok()
            .and_then(LedColor::from_index)
            .map(Directive::Led)
            .ok_or_else(|| ParseError::InvalidLed(command_word.to_string())),
        Topic::All => robot_command
            .parse_next(&mut command_input)
            .map(Directive::All)
            .map_err(|_| ParseError::UnknownCommand(command_word.to_string())),
        Topic::Robot(id) => robot_command
            .parse_next(&mut command_input)
            .map(|command| Directive::Robot(id, command))
            .map_err(|_| ParseError::UnknownCommand(command_word.to_string())),
    }
}

/// Decodes the handshake line a subscriber sends after connecting.
///
/// # Errors
///
/// Returns [`ParseError::InvalidHandshake`] when the keyword is missing and
/// [`ParseError::UnknownTopic`] for any topic that fails to decode.
pub fn parse_subscription(line: &str) -> Result<Subscription, ParseError> {
    let mut input = line.trim();
    let keyword = word
        .parse_next(&mut input)
        .map_err(|_| ParseError::InvalidHandshake(line.trim().to_string()))?;
    if keyword != SUBSCRIBE_KEYWORD {
        return Err(ParseError::InvalidHandshake(line.trim().to_string()));
    }

    let mut subscription = Subscription::broadcast_only();
    while let Ok(raw) = preceded(space1, word).parse_next(&mut input) {
        subscription.insert(decode_topic(raw)?);
    }
    Ok(subscription)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_topic_kind() {
        assert_eq!(parse_directive("all on"), Ok(Directive::All(RobotCommand::On)));
        assert_eq!(
            parse_directive("4 pause"),
            Ok(Directive::Robot(RobotId(4), RobotCommand::Pause))
        );
        assert_eq!(parse_directive("led 2"), Ok(Directive::Led(LedColor::Green)));
    }

    #[test]
    fn tolerates_surrounding_whitespace_and_line_endings() {
        assert_eq!(
            parse_directive("  12\tgo \r\n"),
            Ok(Directive::Robot(RobotId(12), RobotCommand::Go))
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_directive(""), Err(ParseError::Empty));
        assert_eq!(parse_directive("   "), Err(ParseError::Empty));
        assert_eq!(
            parse_directive("all"),
            Err(ParseError::MissingCommand("all".into()))
        );
        assert_eq!(
            parse_directive("allx on"),
            Err(ParseError::UnknownTopic("allx".into()))
        );
        assert_eq!(
            parse_directive("-1 on"),
            Err(ParseError::UnknownTopic("-1".into()))
        );
        assert_eq!(
            parse_directive("3 jump"),
            Err(ParseError::UnknownCommand("jump".into()))
        );
        assert_eq!(
            parse_directive("all ongoing"),
            Err(ParseError::UnknownCommand("ongoing".into()))
        );
        assert_eq!(
            parse_directive("led 5"),
            Err(ParseError::InvalidLed("5".into()))
        );
        assert_eq!(
            parse_directive("led on"),
            Err(ParseError::InvalidLed("on".into()))
        );
        assert_eq!(
            parse_directive("3 pause now"),
            Err(ParseError::TrailingInput("now".into()))
        );
    }

    #[test]
    fn display_output_parses_back() {
        let directive = Directive::Robot(RobotId(9), RobotCommand::Off);
        assert_eq!(parse_directive(&directive.to_string()), Ok(directive));
    }

    #[test]
    fn parses_subscription_handshake() {
        let subscription = parse_subscription("subscribe 3 led\n").unwrap();
        assert_eq!(subscription, Subscription::for_robot(RobotId(3)));

        assert_eq!(
            parse_subscription("hello all"),
            Err(ParseError::InvalidHandshake("hello all".into()))
        );
        assert_eq!(
            parse_subscription("subscribe robots"),
            Err(ParseError::UnknownTopic("robots".into()))
        );
    }
}

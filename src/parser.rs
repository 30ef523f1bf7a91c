use std::path::PathBuf;

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_until},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map_res, opt},
    sequence::{delimited, preceded},
    IResult,
};

use crate::analysis::DEFAULT_SEARCH_K;

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Analyze { path: PathBuf },
    Search { query: String, limit: usize },
    Health,
    Help,
    Exit,
}

// --- BASIC PARSERS ---

fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let (input, content) = alt((
        delimited(char('"'), take_until("\""), char('"')),
        delimited(char('\''), take_until("'"), char('\'')),
    ))(input)?;
    Ok((input, content.to_string()))
}

fn parse_usize(input: &str) -> IResult<&str, usize> {
    map_res(digit1, |s: &str| s.parse::<usize>())(input)
}

// --- HELPERS ---
fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

// --- COMMAND PARSERS ---

fn parse_analyze(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("ANALYZE"), tag_ci("UPLOAD")))(input)?;
    let (input, _) = multispace1(input)?;
    let (input, path) = parse_quoted_string(input)?;
    Ok((input, Command::Analyze { path: PathBuf::from(path) }))
}

fn parse_search(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("SEARCH"), tag_ci("FIND")))(input)?;
    let (input, _) = multispace1(input)?;
    let (input, query) = parse_quoted_string(input)?;
    let (input, limit) = opt(preceded(ws(tag_ci("LIMIT")), parse_usize))(input)?;
    Ok((input, Command::Search { query, limit: limit.unwrap_or(DEFAULT_SEARCH_K) }))
}

fn parse_health(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("HEALTH"), tag_ci("PING")))(input)?;
    Ok((input, Command::Health))
}

fn parse_help(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("HELP")(input)?;
    Ok((input, Command::Help))
}

fn parse_exit(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("EXIT"), tag_ci("QUIT")))(input)?;
    Ok((input, Command::Exit))
}

pub fn parse_command(input: &str) -> Result<Command, String> {
    let input = input.trim();
    let result = alt((parse_analyze, parse_search, parse_health, parse_help, parse_exit))(input);

    match result {
        Ok((remainder, cmd)) => {
            if !remainder.trim().is_empty() {
                return Err(format!("Unexpected tokens at end: '{}'", remainder.trim()));
            }
            Ok(cmd)
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let context: String = if e.input.chars().count() > 20 {
                format!("{}...", e.input.chars().take(20).collect::<String>())
            } else {
                e.input.to_string()
            };
            Err(format!("Invalid syntax near: '{}'", context))
        }
        Err(nom::Err::Incomplete(_)) => Err("Incomplete command.".to_string()),
    }
}

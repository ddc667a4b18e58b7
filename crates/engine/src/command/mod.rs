//! Frame script language.
//!
//! A script is a list of newline-separated blocks. Each block starts with a tag and
//! holds `;`-separated instances of that command:
//!
//! | tag | instance arguments                                        | command        |
//! |-----|-----------------------------------------------------------|----------------|
//! | `C` | `<kind>`                                                  | create entity  |
//! | `U` | `<id> <t> (<key> <value> [<curve>])*`                     | set properties |
//! | `L` | `<name> <source> <w> <h> <row> <col> <count> <perRow>`    | load sheet     |
//! | `W` | `<t>*`                                                    | world commit   |

mod keys;
mod tokenizer;

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::assets::SpritesheetRequest;
use crate::context::{FrameInfo, SharedContext};
use crate::properties::{describe, ConvertContext, Curve, PropertyMap, ValueError};
use crate::scene::{EntityId, EntityKind};

pub use keys::{canonical_key, KEY_SHORTHANDS};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create { id: EntityId, kind: EntityKind },
    Update(PropertyUpdate),
    LoadAsset(SpritesheetRequest),
    WorldCommit { times: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyUpdate {
    pub entity: EntityId,
    pub t: f64,
    pub values: PropertyMap,
    pub curves: BTreeMap<String, Curve>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("line {line}: unknown command tag '{tag}'")]
    UnknownCommand { line: usize, tag: String },
    #[error("line {line}: unknown entity kind '{tag}'")]
    UnknownKind { line: usize, tag: String },
    #[error("line {line}: expected `{usage}`, got {found} argument(s)")]
    ArgumentCount {
        line: usize,
        usage: &'static str,
        found: usize,
    },
    #[error("line {line}: invalid {what} '{token}'")]
    InvalidToken {
        line: usize,
        what: &'static str,
        token: String,
    },
    #[error("line {line}: property '{property}' has no value")]
    MissingValue { line: usize, property: String },
    #[error("line {line}: property '{property}': {source}")]
    InvalidValue {
        line: usize,
        property: String,
        #[source]
        source: ValueError,
    },
    #[error("line {line}: unterminated quote")]
    UnterminatedQuote { line: usize },
}

struct ParseContext<'a> {
    line: usize,
    frame: &'a FrameInfo,
    shared: &'a mut SharedContext,
}

impl ParseContext<'_> {
    fn invalid(&self, what: &'static str, token: &str) -> ParseError {
        ParseError::InvalidToken {
            line: self.line,
            what,
            token: token.to_string(),
        }
    }
}

type ParseFn = fn(&[String], &mut ParseContext<'_>) -> Result<Command, ParseError>;

struct CommandSpec {
    tag: &'static str,
    parse: ParseFn,
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        tag: "C",
        parse: parse_create,
    },
    CommandSpec {
        tag: "U",
        parse: parse_update,
    },
    CommandSpec {
        tag: "L",
        parse: parse_load_asset,
    },
    CommandSpec {
        tag: "W",
        parse: parse_world_commit,
    },
];

/// Parses one turn's script into commands, in script order.
///
/// Entity ids are allocated here, so a `C` consumes an id even when a later block
/// fails to parse. Value conversion problems are reported to the shared error log
/// and replaced by the property's fallback.
pub fn parse_script(
    script: &str,
    frame: &FrameInfo,
    shared: &mut SharedContext,
) -> Result<Vec<Command>, ParseError> {
    let blocks = tokenizer::split_script(script)
        .map_err(|error| ParseError::UnterminatedQuote { line: error.line })?;

    let mut commands = Vec::new();
    for block in blocks {
        let spec = COMMANDS
            .iter()
            .find(|spec| spec.tag == block.tag)
            .ok_or_else(|| ParseError::UnknownCommand {
                line: block.line,
                tag: block.tag.clone(),
            })?;
        let mut context = ParseContext {
            line: block.line,
            frame,
            shared: &mut *shared,
        };
        for args in &block.instances {
            commands.push((spec.parse)(args, &mut context)?);
        }
    }

    debug!(
        turn = frame.number,
        command_count = commands.len(),
        "frame_script_parsed"
    );
    Ok(commands)
}

fn parse_create(args: &[String], context: &mut ParseContext<'_>) -> Result<Command, ParseError> {
    let [tag] = args else {
        return Err(ParseError::ArgumentCount {
            line: context.line,
            usage: "C <kind>",
            found: args.len(),
        });
    };
    let kind = EntityKind::from_tag(tag).ok_or_else(|| ParseError::UnknownKind {
        line: context.line,
        tag: tag.clone(),
    })?;
    context.shared.instance_counter += 1;
    Ok(Command::Create {
        id: EntityId(context.shared.instance_counter),
        kind,
    })
}

fn parse_update(args: &[String], context: &mut ParseContext<'_>) -> Result<Command, ParseError> {
    if args.len() < 2 {
        return Err(ParseError::ArgumentCount {
            line: context.line,
            usage: "U <id> <t> (<key> <value> [<curve>])*",
            found: args.len(),
        });
    }
    let entity = args[0]
        .parse::<u64>()
        .map(EntityId)
        .map_err(|_| context.invalid("entity id", &args[0]))?;
    let t = parse_time(&args[1], context)?;

    let mut values = PropertyMap::new();
    let mut curves = BTreeMap::new();
    let mut index = 2;
    while index < args.len() {
        let key = canonical_key(&args[index]).to_string();
        let token = args.get(index + 1).ok_or_else(|| ParseError::MissingValue {
            line: context.line,
            property: key.clone(),
        })?;
        index += 2;

        let descriptor = describe(&key);
        let parsed = descriptor
            .parse(token)
            .map_err(|source| ParseError::InvalidValue {
                line: context.line,
                property: key.clone(),
                source,
            })?;
        let convert_context = ConvertContext {
            players: &context.shared.players,
            frame: context.frame,
            t,
        };
        let value = match descriptor.convert(parsed, &convert_context) {
            Ok(value) => value,
            Err(failure) => {
                context.shared.errors.push(failure.error);
                failure.fallback
            }
        };

        if let Some(curve) = args.get(index).and_then(|tag| Curve::from_tag(tag)) {
            curves.insert(key.clone(), curve);
            index += 1;
        }
        values.insert(key, value);
    }

    Ok(Command::Update(PropertyUpdate {
        entity,
        t,
        values,
        curves,
    }))
}

fn parse_load_asset(args: &[String], context: &mut ParseContext<'_>) -> Result<Command, ParseError> {
    let [name, source, numbers @ ..] = args else {
        return Err(load_usage(args.len(), context));
    };
    if numbers.len() != 6 {
        return Err(load_usage(args.len(), context));
    }
    let mut parsed = [0u32; 6];
    for (slot, token) in parsed.iter_mut().zip(numbers) {
        *slot = token
            .parse::<u32>()
            .map_err(|_| context.invalid("spritesheet dimension", token))?;
    }
    let [frame_width, frame_height, origin_row, origin_col, count, per_row] = parsed;

    Ok(Command::LoadAsset(SpritesheetRequest {
        name: name.clone(),
        source: source.clone(),
        frame_width,
        frame_height,
        origin_row,
        origin_col,
        count,
        per_row: if per_row > 0 { per_row } else { count },
    }))
}

fn load_usage(found: usize, context: &ParseContext<'_>) -> ParseError {
    ParseError::ArgumentCount {
        line: context.line,
        usage: "L <name> <source> <w> <h> <row> <col> <count> <perRow>",
        found,
    }
}

fn parse_world_commit(
    args: &[String],
    context: &mut ParseContext<'_>,
) -> Result<Command, ParseError> {
    let times = args
        .iter()
        .map(|token| parse_time(token, context))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Command::WorldCommit { times })
}

fn parse_time(token: &str, context: &ParseContext<'_>) -> Result<f64, ParseError> {
    match token.parse::<f64>() {
        Ok(t) if (0.0..=1.0).contains(&t) => Ok(t),
        _ => Err(context.invalid("sub-state time", token)),
    }
}

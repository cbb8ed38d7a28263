//! The UCI wire protocol: messages arriving from the GUI and messages the
//! engine prints in response. Parsing and formatting only; no engine state.

use std::fmt::Display;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("missing argument for `{0}`")]
    MissingArgument(&'static str),
    #[error("invalid argument `{got}` for `{token}`")]
    InvalidArgument { token: &'static str, got: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuiMessage {
    Uci,
    Debug(bool),
    Isready,
    Setoption { name: String, value: Option<String> },
    Ucinewgame,
    Position { pos: Position, moves: Vec<String> },
    Go(Go),
    Stop,
    Ponderhit,
    Quit,
    // Non-standard commands the engine family answers as well.
    Display,
    Eval,
    Flip,
    Bench,
    Book,
    Compiler,
    ExportNet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    Startpos,
    Fen(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Go {
    pub searchmoves: Vec<String>,
    pub ponder: bool,
    pub wtime: Option<i64>,
    pub btime: Option<i64>,
    pub winc: Option<i64>,
    pub binc: Option<i64>,
    pub movestogo: Option<u32>,
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
    pub mate: Option<u32>,
    pub movetime: Option<i64>,
    pub perft: Option<u32>,
    pub infinite: bool,
}

impl GuiMessage {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut parts = text.trim().split_ascii_whitespace();

        match parts.next().ok_or(ParseError::Empty)? {
            "uci" => Ok(Self::Uci),
            "debug" => match parts.next() {
                Some("on") => Ok(Self::Debug(true)),
                Some("off") => Ok(Self::Debug(false)),
                Some(other) => Err(ParseError::InvalidArgument {
                    token: "debug",
                    got: other.to_owned(),
                }),
                None => Err(ParseError::MissingArgument("debug")),
            },
            "isready" => Ok(Self::Isready),
            "setoption" => parse_setoption(&mut parts),
            "ucinewgame" => Ok(Self::Ucinewgame),
            "position" => parse_position(&mut parts),
            "go" => Ok(Self::Go(Go::parse(&mut parts)?)),
            "stop" => Ok(Self::Stop),
            "ponderhit" => Ok(Self::Ponderhit),
            "quit" => Ok(Self::Quit),
            "d" => Ok(Self::Display),
            "eval" => Ok(Self::Eval),
            "flip" => Ok(Self::Flip),
            "bench" => Ok(Self::Bench),
            "book" => Ok(Self::Book),
            "compiler" => Ok(Self::Compiler),
            "export_net" => Ok(Self::ExportNet),
            other => Err(ParseError::UnknownCommand(other.to_owned())),
        }
    }
}

fn parse_setoption<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Result<GuiMessage, ParseError> {
    match parts.next() {
        Some("name") => (),
        _ => return Err(ParseError::MissingArgument("setoption name")),
    }

    // Option names may contain spaces; everything up to the `value` token
    // belongs to the name.
    let mut name_tokens = Vec::new();
    let mut value_tokens = Vec::new();
    let mut in_value = false;

    for token in parts {
        if !in_value && token == "value" {
            in_value = true;
        } else if in_value {
            value_tokens.push(token);
        } else {
            name_tokens.push(token);
        }
    }

    if name_tokens.is_empty() {
        return Err(ParseError::MissingArgument("setoption name"));
    }

    let value = if in_value { Some(value_tokens.join(" ")) } else { None };

    Ok(GuiMessage::Setoption {
        name: name_tokens.join(" "),
        value,
    })
}

fn parse_position<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Result<GuiMessage, ParseError> {
    let pos = match parts.next() {
        Some("startpos") => Position::Startpos,
        Some("fen") => {
            // A FEN is six fields, but tolerate four (some GUIs drop the counters).
            let mut fields = Vec::new();
            for token in parts.by_ref() {
                if token == "moves" {
                    let moves = parts.map(str::to_owned).collect();
                    if fields.len() < 4 {
                        return Err(ParseError::MissingArgument("position fen"));
                    }
                    return Ok(GuiMessage::Position {
                        pos: Position::Fen(fields.join(" ")),
                        moves,
                    });
                }
                fields.push(token.to_owned());
            }

            if fields.len() < 4 {
                return Err(ParseError::MissingArgument("position fen"));
            }

            return Ok(GuiMessage::Position {
                pos: Position::Fen(fields.join(" ")),
                moves: vec![],
            });
        }
        _ => return Err(ParseError::MissingArgument("position")),
    };

    let moves = match parts.next() {
        Some("moves") => parts.map(str::to_owned).collect(),
        _ => vec![],
    };

    Ok(GuiMessage::Position { pos, moves })
}

impl Go {
    pub fn parse<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Result<Self, ParseError> {
        fn number<'a, T: std::str::FromStr>(
            parts: &mut impl Iterator<Item = &'a str>,
            token: &'static str,
        ) -> Result<T, ParseError> {
            let raw = parts.next().ok_or(ParseError::MissingArgument(token))?;
            raw.parse().map_err(|_| ParseError::InvalidArgument {
                token,
                got: raw.to_owned(),
            })
        }

        let mut go = Go::default();

        while let Some(p) = parts.next() {
            match p {
                "ponder" => go.ponder = true,
                "infinite" => go.infinite = true,
                "wtime" => go.wtime = Some(number(parts, "wtime")?),
                "btime" => go.btime = Some(number(parts, "btime")?),
                "winc" => go.winc = Some(number(parts, "winc")?),
                "binc" => go.binc = Some(number(parts, "binc")?),
                "movestogo" => go.movestogo = Some(number(parts, "movestogo")?),
                "depth" => go.depth = Some(number(parts, "depth")?),
                "nodes" => go.nodes = Some(number(parts, "nodes")?),
                "mate" => go.mate = Some(number(parts, "mate")?),
                "movetime" => go.movetime = Some(number(parts, "movetime")?),
                "perft" => go.perft = Some(number(parts, "perft")?),
                "searchmoves" => {
                    // Everything that parses as a move token belongs here;
                    // searchmoves is specified to come last.
                    go.searchmoves = parts.map(str::to_owned).collect();
                    break;
                }
                other => {
                    return Err(ParseError::InvalidArgument {
                        token: "go",
                        got: other.to_owned(),
                    })
                }
            }
        }

        Ok(go)
    }

    /// True when the search should manage its own clock.
    pub fn use_time_management(&self) -> bool {
        !self.infinite
            && self.depth.is_none()
            && self.nodes.is_none()
            && self.movetime.is_none()
            && self.mate.is_none()
            && (self.wtime.is_some() || self.btime.is_some())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum EngineMessage {
    Id(Id),
    Uciok,
    Readyok,
    Option(OptionDecl),
    Bestmove { mv: String, ponder: Option<String> },
    Info(Info),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Id {
    Name(String),
    Author(String),
}

/// An `option name ... type ...` declaration printed in response to `uci`.
#[derive(Debug, PartialEq, Eq)]
pub struct OptionDecl {
    pub name: String,
    pub kind: OptionKind,
}

#[derive(Debug, PartialEq, Eq)]
pub enum OptionKind {
    Check { default: bool },
    Spin { default: i64, min: i64, max: i64 },
    Combo { default: String, vars: Vec<String> },
    Button,
    Str { default: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Cp(i32),
    Mate(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBound {
    Lower,
    Upper,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Info {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    pub multipv: Option<u32>,
    pub score: Option<Score>,
    pub score_bound: Option<ScoreBound>,
    pub wdl: Option<(u32, u32, u32)>,
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
    pub hashfull: Option<u32>,
    pub tbhits: Option<u64>,
    pub time: Option<u64>,
    pub currmove: Option<String>,
    pub currmovenumber: Option<u32>,
    pub pv: Vec<String>,
    pub string: Option<String>,
}

impl Display for EngineMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(Id::Name(name)) => write!(f, "id name {name}"),
            Self::Id(Id::Author(author)) => write!(f, "id author {author}"),
            Self::Uciok => write!(f, "uciok"),
            Self::Readyok => write!(f, "readyok"),
            Self::Option(decl) => decl.fmt(f),
            Self::Bestmove { mv, ponder } => {
                write!(f, "bestmove {mv}")?;
                if let Some(ponder) = ponder {
                    write!(f, " ponder {ponder}")?;
                }
                Ok(())
            }
            Self::Info(info) => info.fmt(f),
        }
    }
}

impl Display for OptionDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "option name {} type ", self.name)?;
        match &self.kind {
            OptionKind::Check { default } => write!(f, "check default {default}"),
            OptionKind::Spin { default, min, max } => {
                write!(f, "spin default {default} min {min} max {max}")
            }
            OptionKind::Combo { default, vars } => {
                write!(f, "combo default {default}")?;
                for v in vars {
                    write!(f, " var {v}")?;
                }
                Ok(())
            }
            OptionKind::Button => write!(f, "button"),
            OptionKind::Str { default } => write!(f, "string default {default}"),
        }
    }
}

impl Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cp(cp) => write!(f, "cp {cp}"),
            Self::Mate(mate) => write!(f, "mate {mate}"),
        }
    }
}

impl Display for Info {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn field<T: Display>(f: &mut std::fmt::Formatter<'_>, name: &str, value: &Option<T>) -> std::fmt::Result {
            if let Some(v) = value {
                write!(f, " {name} {v}")?;
            }
            Ok(())
        }

        write!(f, "info")?;
        field(f, "depth", &self.depth)?;
        field(f, "seldepth", &self.seldepth)?;
        field(f, "multipv", &self.multipv)?;
        field(f, "score", &self.score)?;

        if self.score.is_some() {
            match self.score_bound {
                Some(ScoreBound::Lower) => write!(f, " lowerbound")?,
                Some(ScoreBound::Upper) => write!(f, " upperbound")?,
                None => (),
            }

            if let Some((w, d, l)) = self.wdl {
                write!(f, " wdl {w} {d} {l}")?;
            }
        }

        field(f, "nodes", &self.nodes)?;
        field(f, "nps", &self.nps)?;
        field(f, "hashfull", &self.hashfull)?;
        field(f, "tbhits", &self.tbhits)?;
        field(f, "time", &self.time)?;
        field(f, "currmove", &self.currmove)?;
        field(f, "currmovenumber", &self.currmovenumber)?;

        if !self.pv.is_empty() {
            write!(f, " pv")?;
            for m in &self.pv {
                write!(f, " {m}")?;
            }
        }

        field(f, "string", &self.string)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_commands() {
        assert_eq!(GuiMessage::parse("uci\n"), Ok(GuiMessage::Uci));
        assert_eq!(GuiMessage::parse("  isready "), Ok(GuiMessage::Isready));
        assert_eq!(GuiMessage::parse("stop"), Ok(GuiMessage::Stop));
        assert_eq!(GuiMessage::parse("quit"), Ok(GuiMessage::Quit));
        assert_eq!(GuiMessage::parse("d"), Ok(GuiMessage::Display));
        assert!(matches!(
            GuiMessage::parse("frobnicate"),
            Err(ParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn parse_setoption_with_spaced_name() {
        let msg = GuiMessage::parse("setoption name Move Overhead value 30").unwrap();
        assert_eq!(
            msg,
            GuiMessage::Setoption {
                name: "Move Overhead".to_owned(),
                value: Some("30".to_owned()),
            }
        );

        let msg = GuiMessage::parse("setoption name Clear Hash").unwrap();
        assert_eq!(
            msg,
            GuiMessage::Setoption {
                name: "Clear Hash".to_owned(),
                value: None,
            }
        );
    }

    #[test]
    fn parse_position_fen_and_moves() {
        let msg = GuiMessage::parse(
            "position fen 6k1/5ppp/8/8/8/8/5PPP/R6K w - - 0 1 moves a1a8",
        )
        .unwrap();

        let GuiMessage::Position { pos, moves } = msg else {
            panic!("expected a position message");
        };
        assert_eq!(pos, Position::Fen("6k1/5ppp/8/8/8/8/5PPP/R6K w - - 0 1".to_owned()));
        assert_eq!(moves, vec!["a1a8".to_owned()]);
    }

    #[test]
    fn parse_go_with_clock() {
        let msg = GuiMessage::parse("go wtime 60000 btime 60000 winc 1000 binc 1000 movestogo 40").unwrap();
        let GuiMessage::Go(go) = msg else { panic!() };
        assert_eq!(go.wtime, Some(60000));
        assert_eq!(go.binc, Some(1000));
        assert_eq!(go.movestogo, Some(40));
        assert!(go.use_time_management());

        let GuiMessage::Go(go) = GuiMessage::parse("go depth 12").unwrap() else {
            panic!()
        };
        assert_eq!(go.depth, Some(12));
        assert!(!go.use_time_management());
    }

    #[test]
    fn info_line_field_order() {
        let info = Info {
            depth: Some(12),
            seldepth: Some(20),
            multipv: Some(1),
            score: Some(Score::Cp(23)),
            wdl: Some((402, 540, 58)),
            nodes: Some(123_456),
            nps: Some(1_000_000),
            hashfull: Some(17),
            tbhits: Some(0),
            time: Some(123),
            pv: vec!["e2e4".to_owned(), "e7e5".to_owned()],
            ..Info::default()
        };

        let line = EngineMessage::Info(info).to_string();
        assert_eq!(
            line,
            "info depth 12 seldepth 20 multipv 1 score cp 23 wdl 402 540 58 \
             nodes 123456 nps 1000000 hashfull 17 tbhits 0 time 123 pv e2e4 e7e5"
        );
    }

    #[test]
    fn bestmove_with_ponder() {
        let msg = EngineMessage::Bestmove {
            mv: "e2e4".to_owned(),
            ponder: Some("e7e5".to_owned()),
        };
        assert_eq!(msg.to_string(), "bestmove e2e4 ponder e7e5");
    }

    #[test]
    fn option_declarations() {
        let decl = OptionDecl {
            name: "Hash".to_owned(),
            kind: OptionKind::Spin { default: 16, min: 1, max: 33554432 },
        };
        assert_eq!(
            EngineMessage::Option(decl).to_string(),
            "option name Hash type spin default 16 min 1 max 33554432"
        );

        let decl = OptionDecl {
            name: "Persisted learning".to_owned(),
            kind: OptionKind::Combo {
                default: "Off".to_owned(),
                vars: vec!["Off".to_owned(), "Standard".to_owned(), "Self".to_owned()],
            },
        };
        assert_eq!(
            EngineMessage::Option(decl).to_string(),
            "option name Persisted learning type combo default Off var Off var Standard var Self"
        );
    }
}

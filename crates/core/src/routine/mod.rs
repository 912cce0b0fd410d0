//! The dance routine: the validated move list and the sequencer that walks
//! it one beat at a time.

use std::{
    fmt,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{Actuator, DanceError, Move, Result};

/// Token that skips a beat without moving.
pub const WAIT_TOKEN: &str = "w";
/// Spelled-out form accepted in place of [`WAIT_TOKEN`].
pub const WAIT_ALIAS: &str = "wait";

/// One entry of a move list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveToken {
    Wait,
    Move(Move),
}

impl MoveToken {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            WAIT_TOKEN | WAIT_ALIAS => Some(Self::Wait),
            other => other.parse().ok().map(Self::Move),
        }
    }
}

impl fmt::Display for MoveToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wait => f.write_str("wait"),
            Self::Move(mv) => write!(f, "{mv}"),
        }
    }
}

/// Ordered routine, validated on load and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveList {
    tokens: Vec<MoveToken>,
}

impl MoveList {
    pub fn new(tokens: Vec<MoveToken>) -> Result<Self> {
        if tokens.is_empty() {
            return Err(DanceError::EmptyMoveList);
        }
        Ok(Self { tokens })
    }

    /// Reads one token per line. Surrounding whitespace is ignored and
    /// blank lines are skipped; anything else must be a known token.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut tokens = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let token = line.trim();
            if token.is_empty() {
                continue;
            }
            let parsed = MoveToken::parse(token).ok_or_else(|| DanceError::UnknownMove {
                line: index + 1,
                token: token.to_string(),
            })?;
            tokens.push(parsed);
        }
        Self::new(tokens)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<MoveToken> {
        self.tokens.get(index).copied()
    }

    pub fn tokens(&self) -> &[MoveToken] {
        &self.tokens
    }

    /// Number of entries that actually move the robot.
    pub fn move_count(&self) -> usize {
        self.tokens
            .iter()
            .filter(|token| matches!(token, MoveToken::Move(_)))
            .count()
    }
}

impl FromStr for MoveList {
    type Err = DanceError;

    fn from_str(text: &str) -> Result<Self> {
        Self::from_reader(text.as_bytes())
    }
}

/// What the sequencer did with a beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    Dispatched(Move),
    Waited,
}

/// Walks the move list, one entry per beat.
#[derive(Debug, Clone)]
pub struct MoveSequencer {
    moves: MoveList,
    cursor: usize,
    current: Option<MoveToken>,
}

impl MoveSequencer {
    pub fn new(moves: MoveList) -> Self {
        Self {
            moves,
            cursor: 0,
            current: None,
        }
    }

    /// Consumes one beat. A move is handed to `actuator` at `intensity`; a
    /// wait dispatches nothing. Either way the cursor advances by one.
    ///
    /// Once the list is used up every further beat is rejected with
    /// [`DanceError::SequenceExhausted`] and nothing is dispatched.
    pub fn on_beat(&mut self, actuator: &mut dyn Actuator, intensity: u8) -> Result<Step> {
        let token = self
            .moves
            .get(self.cursor)
            .ok_or(DanceError::SequenceExhausted {
                len: self.moves.len(),
            })?;

        let step = match token {
            MoveToken::Wait => Step::Waited,
            MoveToken::Move(mv) => {
                actuator.dispatch(mv, intensity);
                Step::Dispatched(mv)
            }
        };

        self.current = Some(token);
        self.cursor += 1;
        Ok(step)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Token consumed by the most recent beat.
    pub fn current(&self) -> Option<MoveToken> {
        self.current
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.moves.len()
    }

    pub fn remaining(&self) -> usize {
        self.moves.len().saturating_sub(self.cursor)
    }

    pub fn moves(&self) -> &MoveList {
        &self.moves
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[derive(Default)]
    struct RecordingActuator {
        dispatched: Vec<(Move, u8)>,
    }

    impl Actuator for RecordingActuator {
        fn dispatch(&mut self, mv: Move, intensity: u8) {
            self.dispatched.push((mv, intensity));
        }

        fn stop(&mut self) {}
    }

    #[test]
    fn parses_tokens_line_by_line() {
        let list: MoveList = "F\nFS\n  w \n\nL\nwait\nRS\n".parse().unwrap();
        assert_eq!(
            list.tokens(),
            &[
                MoveToken::Move(Move::Forward),
                MoveToken::Move(Move::ForwardSlow),
                MoveToken::Wait,
                MoveToken::Move(Move::Left),
                MoveToken::Wait,
                MoveToken::Move(Move::RightSlow),
            ]
        );
        assert_eq!(list.move_count(), 4);
    }

    #[test]
    fn unknown_token_reports_its_line() {
        let err = "F\nB\nspin\n".parse::<MoveList>().unwrap_err();
        match err {
            DanceError::UnknownMove { line, token } => {
                assert_eq!(line, 3);
                assert_eq!(token, "spin");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn empty_list_is_rejected() {
        assert!(matches!(
            "\n  \n".parse::<MoveList>(),
            Err(DanceError::EmptyMoveList)
        ));
    }

    #[test]
    fn loads_move_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "R").unwrap();
        writeln!(file, "w").unwrap();
        writeln!(file, "B").unwrap();

        let list = MoveList::load(file.path()).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.get(2), Some(MoveToken::Move(Move::Back)));
    }

    #[test]
    fn wait_consumes_a_beat_without_dispatch() {
        let mut sequencer = MoveSequencer::new("w\nF".parse().unwrap());
        let mut actuator = RecordingActuator::default();

        assert_eq!(sequencer.on_beat(&mut actuator, 60).unwrap(), Step::Waited);
        assert_eq!(sequencer.cursor(), 1);
        assert_eq!(sequencer.current(), Some(MoveToken::Wait));
        assert!(actuator.dispatched.is_empty());

        assert_eq!(
            sequencer.on_beat(&mut actuator, 60).unwrap(),
            Step::Dispatched(Move::Forward)
        );
        assert_eq!(actuator.dispatched, vec![(Move::Forward, 60)]);
    }

    #[test]
    fn exhausted_sequence_dispatches_nothing() {
        let mut sequencer = MoveSequencer::new("L".parse().unwrap());
        let mut actuator = RecordingActuator::default();

        sequencer.on_beat(&mut actuator, 60).unwrap();
        assert!(sequencer.is_finished());
        assert_eq!(sequencer.remaining(), 0);

        let err = sequencer.on_beat(&mut actuator, 60).unwrap_err();
        assert!(matches!(err, DanceError::SequenceExhausted { len: 1 }));
        assert_eq!(sequencer.cursor(), 1);
        assert_eq!(actuator.dispatched.len(), 1);
    }
}

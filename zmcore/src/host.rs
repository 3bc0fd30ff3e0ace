use crate::errors::ZmResult;

/// What `show_status` displays on the right-hand side of the status bar,
/// chosen by header flag 1 bit 1 (§4.6).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatusRight {
    ScoreAndTurns { score: i16, turns: u16 },
    Time { hours: u8, minutes: u8 },
}

/// What the host returned from a blocking read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostInput {
    Line(String),
    Quit,
}

/// Everything the execution engine needs from its surrounding environment.
/// Implemented by the terminal crate; a headless test harness can implement
/// it with a scripted transcript instead.
///
/// Reference: rustifterm's `IFTerminalClient`, generalized into a trait so
/// the core engine never depends on a concrete terminal.
pub trait Host {
    /// Append narrative text to the main transcript.
    fn write_text(&mut self, text: &str) -> ZmResult<()>;

    /// Emit a single decoded ZSCII character (`print_char`). Default
    /// delegates to `write_text` for hosts that don't distinguish the two.
    fn write_char(&mut self, c: char) -> ZmResult<()> {
        let mut buf = [0u8; 4];
        self.write_text(c.encode_utf8(&mut buf))
    }

    /// Render (or refresh) the one-line status bar.
    fn show_status(&mut self, location: &str, right: StatusRight) -> ZmResult<()>;

    /// Block for one line of input, truncated to at most `max_len` ZSCII
    /// characters by the caller after this returns.
    fn read_line(&mut self) -> ZmResult<HostInput>;

    /// Called once when the game executes `quit`.
    fn quit(&mut self) -> ZmResult<()>;

    /// Persist an opaque dynamic-memory snapshot for `save`. The default
    /// stub always reports failure, matching hosts that don't implement
    /// persistence (§6's Open Question on save-file formats).
    fn save(&mut self, _snapshot: &[u8]) -> ZmResult<bool> {
        Ok(false)
    }

    /// Retrieve a previously saved snapshot for `restore`, or `None` if
    /// none is available / persistence isn't implemented.
    fn restore(&mut self) -> ZmResult<Option<Vec<u8>>> {
        Ok(None)
    }

    /// Reserve `lines` at the top of the screen as an upper window
    /// (`split_window`). Default no-op, matching hosts without windowing.
    fn split_window(&mut self, _lines: u16) -> ZmResult<()> {
        Ok(())
    }

    /// Select window `n` as the active output window (`set_window`).
    /// Default no-op, matching hosts without windowing.
    fn set_window(&mut self, _n: u16) -> ZmResult<()> {
        Ok(())
    }
}

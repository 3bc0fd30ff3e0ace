use std::fs::File;
use std::io::{self, stdin, BufRead, Read, Write};
use std::path::{Path, PathBuf};

use crossterm::execute;
use crossterm::style::{Attribute, Print, SetAttribute, Stylize};
use crossterm::terminal;

use zmcore::errors::ZmResult;
use zmcore::{Host, HostInput, StatusRight, ZMachine, ZmError};

use crate::errors::IFtResult;

/// An ANSI terminal implementation of the core's `Host` trait: renders
/// narrative text and a reverse-video status bar, reads input lines, and
/// optionally highlights the current room's name when it's echoed back in
/// narrative text.
///
/// Reference: rustifterm's `IFTerminalClient` (story loading, run loop
/// shape) generalized into a `Host` implementor, with status-bar rendering
/// grounded on the V3 status line drawing in gruesome's `display_v3`.
pub struct TerminalHost {
    plain: bool,
    no_highlight: bool,
    save_dir: Option<PathBuf>,
    last_location_name: Option<String>,
}

impl TerminalHost {
    pub fn new(plain: bool, no_highlight: bool, save_dir: Option<PathBuf>) -> Self {
        TerminalHost {
            plain,
            no_highlight,
            save_dir,
            last_location_name: None,
        }
    }

    fn save_file_path(&self) -> Option<PathBuf> {
        self.save_dir.as_ref().map(|dir| dir.join("zmterm.sav"))
    }

    fn print_plain_or_styled(&self, text: &str) {
        if self.plain || self.no_highlight {
            print!("{}", text);
        } else {
            match &self.last_location_name {
                Some(name) if !name.is_empty() && text.contains(name.as_str()) => {
                    print!("{}", text.replace(name.as_str(), &format!("{}", name.as_str().bold())));
                }
                _ => print!("{}", text),
            }
        }
        io::stdout().flush().ok();
    }
}

impl Host for TerminalHost {
    fn write_text(&mut self, text: &str) -> ZmResult<()> {
        self.print_plain_or_styled(text);
        Ok(())
    }

    fn show_status(&mut self, location: &str, right: StatusRight) -> ZmResult<()> {
        self.last_location_name = Some(location.to_string());
        if self.plain {
            return Ok(());
        }

        let right_text = match right {
            StatusRight::ScoreAndTurns { score, turns } => format!("Score: {}  Turns: {}", score, turns),
            StatusRight::Time { hours, minutes } => format!("{:02}:{:02}", hours, minutes),
        };
        let (width, _) = terminal::size().unwrap_or((80, 24));
        let mut content = format!(" {}", location);
        let padding = (width as usize).saturating_sub(content.len() + right_text.len() + 1);
        content.push_str(&" ".repeat(padding));
        content.push_str(&right_text);
        content.push(' ');
        content.truncate(width as usize);

        execute!(
            io::stdout(),
            crossterm::cursor::SavePosition,
            crossterm::cursor::MoveTo(0, 0),
            SetAttribute(Attribute::Reverse),
            Print(content),
            SetAttribute(Attribute::Reset),
            crossterm::cursor::RestorePosition,
        )
        .map_err(ZmError::Io)?;
        io::stdout().flush().ok();
        Ok(())
    }

    fn read_line(&mut self) -> ZmResult<HostInput> {
        let mut line = String::new();
        match stdin().lock().read_line(&mut line) {
            Ok(0) => Ok(HostInput::Quit), // Ctrl-D / EOF
            Ok(_) => Ok(HostInput::Line(line.trim_end_matches('\n').to_string())),
            Err(e) => Err(ZmError::Io(e)),
        }
    }

    fn quit(&mut self) -> ZmResult<()> {
        println!();
        Ok(())
    }

    fn save(&mut self, snapshot: &[u8]) -> ZmResult<bool> {
        let Some(path) = self.save_file_path() else {
            return Ok(false);
        };
        match File::create(&path).and_then(|mut f| f.write_all(snapshot)) {
            Ok(()) => Ok(true),
            Err(e) => {
                log::warn!("save to {} failed: {}", path.display(), e);
                Ok(false)
            }
        }
    }

    fn restore(&mut self) -> ZmResult<Option<Vec<u8>>> {
        let Some(path) = self.save_file_path() else {
            return Ok(None);
        };
        match File::open(&path) {
            Ok(mut f) => {
                let mut bytes = Vec::new();
                f.read_to_end(&mut bytes).map_err(ZmError::Io)?;
                Ok(Some(bytes))
            }
            Err(e) => {
                log::warn!("restore from {} failed: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}

/// The Interactive Fiction Terminal Client is the frontend interface used
/// to play a story file by managing user input and game output.
pub struct IFTerminalClient {
    vm: ZMachine,
    host: TerminalHost,
}

impl IFTerminalClient {
    pub fn with_story_file(
        story_path: &Path,
        seed: u64,
        plain: bool,
        no_highlight: bool,
        save_dir: Option<PathBuf>,
    ) -> IFtResult<Self> {
        let mut story_file = File::open(story_path)?;
        let vm = ZMachine::from_story_reader(&mut story_file, seed)?;
        Ok(IFTerminalClient {
            vm,
            host: TerminalHost::new(plain, no_highlight, save_dir),
        })
    }

    pub fn run(&mut self) -> IFtResult<()> {
        let has_screen_splitting = !self.host.plain;
        self.vm.start(true, has_screen_splitting)?;
        self.vm.run(&mut self.host)?;
        Ok(())
    }
}

//! Print a controller snapshot as a table on the terminal.
use std::io::Write;

use termcolor::{self, Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing::{event, Level};

use mscp::{ControllerInfo, PortState, UnitInfo};

fn get_colour_choice() -> termcolor::ColorChoice {
    if atty::is(atty::Stream::Stdout) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

pub struct ReportWriter {
    stream: StandardStream,
}

impl ReportWriter {
    pub fn new() -> ReportWriter {
        ReportWriter {
            stream: StandardStream::stdout(get_colour_choice()),
        }
    }

    fn set_colour(&mut self, colour: Option<Color>, bold: bool) {
        let mut spec = ColorSpec::new();
        spec.set_fg(colour).set_bold(bold);
        if let Err(e) = self.stream.set_color(&spec) {
            event!(Level::ERROR, "Failed to select colour {:?}: {}", spec, e);
        }
    }

    fn coloured(&mut self, colour: Color, text: &str) -> Result<(), std::io::Error> {
        self.set_colour(Some(colour), false);
        write!(self.stream, "{text}")?;
        self.set_colour(None, false);
        Ok(())
    }

    fn unit_line(&mut self, unit: &UnitInfo) -> Result<(), std::io::Error> {
        write!(self.stream, "  {:>3}  {:<5} ", unit.number, unit.drive)?;
        match (unit.attached, unit.online) {
            (false, _) => self.coloured(Color::Red, "no volume")?,
            (true, false) => self.coloured(Color::Yellow, "available")?,
            (true, true) => self.coloured(Color::Green, "online   ")?,
        }
        write!(
            self.stream,
            "  flags {:#06x}  chunks {:>6}",
            unit.flags.bits(),
            unit.chunks
        )?;
        if let Some(position) = unit.tape_position {
            write!(self.stream, "  position {position}")?;
        }
        if unit.serious_exception {
            write!(self.stream, "  ")?;
            self.coloured(Color::Red, "serious exception")?;
        }
        if unit.busy || unit.pending > 0 {
            write!(self.stream, "  busy ({} pending)", unit.pending)?;
        }
        writeln!(self.stream)
    }

    pub fn write(&mut self, info: &ControllerInfo) -> Result<(), std::io::Error> {
        self.set_colour(None, true);
        write!(self.stream, "{} port at {:o}", info.protocol, info.csr)?;
        self.set_colour(None, false);
        write!(self.stream, ": ")?;
        match info.state {
            PortState::Up => self.coloured(Color::Green, "up")?,
            PortState::Dead => self.coloured(Color::Red, "dead")?,
            other => self.coloured(Color::Yellow, &other.to_string())?,
        }
        writeln!(self.stream, ", SA {:#06x}", info.sa)?;
        if let Some(code) = info.last_failure {
            writeln!(self.stream, "  last failure: {code}")?;
        }
        writeln!(
            self.stream,
            "  command ring {} slots at {:o}, response ring {} slots at {:o}, vector {:o}",
            info.command_ring.slots,
            info.command_ring.base,
            info.response_ring.slots,
            info.response_ring.base,
            info.vector
        )?;
        writeln!(
            self.stream,
            "  {} of {} packets free, {} credits, controller flags {:#06x}",
            info.packets_free,
            info.packets,
            info.credits,
            info.flags.bits()
        )?;
        for unit in &info.units {
            self.unit_line(unit)?;
        }
        self.stream.flush()
    }

    pub fn disconnect(&mut self) {
        if let Err(e) = self.stream.reset() {
            event!(Level::ERROR, "Failed to reset terminal: {}", e);
        }
    }
}

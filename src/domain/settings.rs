use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::fmt;

/// Serial line settings parsed from an stty-like string such as `"9600 cs8 -parenb raw"`.
///
/// Every field is optional: `None` leaves the corresponding device attribute untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: Option<u32>,
    pub data_bits: Option<DataBits>,
    pub stop_bits: Option<StopBits>,
    /// `parenb` / `-parenb`
    pub parity_enabled: Option<bool>,
    /// `parodd` / `-parodd`
    pub parity_odd: Option<bool>,
    /// `crtscts` / `-crtscts`
    pub hardware_flow: Option<bool>,
    /// `ixon` / `ixoff` and their negations
    pub software_flow: Option<bool>,
    pub raw: Option<bool>,
    pub clocal: Option<bool>,
    pub hupcl: Option<bool>,
    /// Tokens that were not understood; they are reported and otherwise ignored.
    pub unrecognized: Vec<String>,
}

impl SerialSettings {
    pub fn parse(input: &str) -> Self {
        let mut settings = SerialSettings::default();

        for token in input.split_whitespace() {
            let (negated, word) = match token.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, token),
            };

            match word {
                "cs5" if !negated => settings.data_bits = Some(DataBits::Five),
                "cs6" if !negated => settings.data_bits = Some(DataBits::Six),
                "cs7" if !negated => settings.data_bits = Some(DataBits::Seven),
                "cs8" if !negated => settings.data_bits = Some(DataBits::Eight),
                "parenb" => settings.parity_enabled = Some(!negated),
                "parodd" => settings.parity_odd = Some(!negated),
                "cstopb" => {
                    settings.stop_bits = Some(if negated { StopBits::One } else { StopBits::Two })
                }
                "crtscts" => settings.hardware_flow = Some(!negated),
                "ixon" | "ixoff" => settings.software_flow = Some(!negated),
                "raw" => settings.raw = Some(!negated),
                "sane" if !negated => settings.raw = Some(false),
                "clocal" => settings.clocal = Some(!negated),
                "hupcl" => settings.hupcl = Some(!negated),
                digits if !negated && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
                    match digits.parse::<u32>() {
                        Ok(baud) if baud > 0 => settings.baud_rate = Some(baud),
                        _ => settings.unrecognized.push(token.to_string()),
                    }
                }
                _ => settings.unrecognized.push(token.to_string()),
            }
        }

        settings
    }

    /// Parity to program, if the string said anything about enabling or disabling it.
    pub fn parity(&self) -> Option<Parity> {
        match (self.parity_enabled, self.parity_odd) {
            (Some(false), _) => Some(Parity::None),
            (Some(true), Some(true)) => Some(Parity::Odd),
            (Some(true), _) => Some(Parity::Even),
            (None, _) => None,
        }
    }

    pub fn flow_control(&self) -> Option<FlowControl> {
        match (self.hardware_flow, self.software_flow) {
            (Some(true), _) => Some(FlowControl::Hardware),
            (_, Some(true)) => Some(FlowControl::Software),
            (None, None) => None,
            _ => Some(FlowControl::None),
        }
    }

    /// True when at least one termios flag outside the serialport API is requested.
    pub fn has_line_flags(&self) -> bool {
        self.raw.is_some() || self.clocal.is_some() || self.hupcl.is_some()
    }
}

impl fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if let Some(baud) = self.baud_rate {
            parts.push(baud.to_string());
        }
        if let Some(bits) = self.data_bits {
            parts.push(format!("data={:?}", bits));
        }
        if let Some(parity) = self.parity() {
            parts.push(format!("parity={:?}", parity));
        }
        if let Some(stop) = self.stop_bits {
            parts.push(format!("stop={:?}", stop));
        }
        if let Some(flow) = self.flow_control() {
            parts.push(format!("flow={:?}", flow));
        }
        if let Some(raw) = self.raw {
            parts.push(if raw { "raw".into() } else { "-raw".into() });
        }
        write!(f, "{}", parts.join(" "))
    }
}

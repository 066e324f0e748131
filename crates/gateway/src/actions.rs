//! Custom ids of the buttons the bot attaches to a finished grid.

use mjlink_core::{Error, Result};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanDirection {
    Left,
    Right,
    Up,
    Down,
}

impl PanDirection {
    fn as_str(self) -> &'static str {
        match self {
            PanDirection::Left => "left",
            PanDirection::Right => "right",
            PanDirection::Up => "up",
            PanDirection::Down => "down",
        }
    }
}

impl FromStr for PanDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "left" => Ok(PanDirection::Left),
            "right" => Ok(PanDirection::Right),
            "up" => Ok(PanDirection::Up),
            "down" => Ok(PanDirection::Down),
            other => Err(Error::Other(format!("unknown pan direction: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomLevel {
    High,
    Low,
    /// Outpaint to 2x.
    Double,
    /// Outpaint to 1.5x.
    OneAndHalf,
    Square,
    /// Zoom chosen by a follow-up prompt.
    Custom,
}

impl FromStr for ZoomLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(ZoomLevel::High),
            "low" => Ok(ZoomLevel::Low),
            "2x" => Ok(ZoomLevel::Double),
            "1.5x" => Ok(ZoomLevel::OneAndHalf),
            "square" => Ok(ZoomLevel::Square),
            "custom" => Ok(ZoomLevel::Custom),
            other => Err(Error::Other(format!("unknown zoom level: {}", other))),
        }
    }
}

fn check_index(index: u8) -> Result<u8> {
    if (1..=4).contains(&index) {
        Ok(index)
    } else {
        Err(Error::Other(format!("grid index must be 1-4, got {}", index)))
    }
}

pub fn upscale(index: u8, hash: &str) -> Result<String> {
    Ok(format!("MJ::JOB::upsample::{}::{}", check_index(index)?, hash))
}

pub fn variation(index: u8, hash: &str) -> Result<String> {
    Ok(format!("MJ::JOB::variation::{}::{}", check_index(index)?, hash))
}

pub fn reroll(hash: &str) -> String {
    format!("MJ::JOB::reroll::0::{}::SOLO", hash)
}

pub fn pan(direction: PanDirection, hash: &str) -> String {
    format!("MJ::JOB::pan_{}::1::{}::SOLO", direction.as_str(), hash)
}

pub fn zoom_out(level: ZoomLevel, hash: &str) -> String {
    match level {
        ZoomLevel::High => format!("MJ::JOB::high_variation::1::{}::SOLO", hash),
        ZoomLevel::Low => format!("MJ::JOB::low_variation::1::{}::SOLO", hash),
        ZoomLevel::Double => format!("MJ::Outpaint::50::1::{}::SOLO", hash),
        ZoomLevel::OneAndHalf => format!("MJ::Outpaint::75::1::{}::SOLO", hash),
        ZoomLevel::Square => format!("MJ::Outpaint::100::1::{}::SOLO", hash),
        ZoomLevel::Custom => format!("MJ::CustomZoom::{}", hash),
    }
}

/// Modal the bot opens after some clicks, and the text input that carries
/// the follow-up prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalForm {
    pub custom_id: String,
    pub input_id: &'static str,
}

/// Modal that follows a click on `custom_id`, if any. Variations only open
/// one when remix mode is on.
pub fn modal_form(custom_id: &str, remix: bool) -> Option<ModalForm> {
    let parts: Vec<&str> = custom_id.split("::").collect();
    match ActionKind::classify(custom_id) {
        ActionKind::CustomPan => {
            let direction = parts.get(2)?.strip_prefix("pan_")?;
            Some(ModalForm {
                custom_id: format!("MJ::PanModal::{}::{}::{}", direction, parts.get(4)?, parts.get(3)?),
                input_id: "MJ::PanModal::prompt",
            })
        }
        ActionKind::CustomZoom => Some(ModalForm {
            custom_id: format!("MJ::OutpaintCustomZoomModal::{}", parts.get(2)?),
            input_id: "MJ::OutpaintCustomZoomModal::prompt",
        }),
        ActionKind::Variation if remix => {
            // variation::{index}::{hash} or {low,high}_variation::1::{hash}::SOLO
            let (index, hash) = (parts.get(3)?, parts.get(4)?);
            Some(ModalForm {
                custom_id: format!("MJ::RemixModal::{}::{}::1", hash, index),
                input_id: "MJ::RemixModal::new_prompt",
            })
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Upscale,
    Variation,
    Reroll,
    CustomPan,
    CustomZoom,
    Other,
}

impl ActionKind {
    pub fn classify(custom_id: &str) -> Self {
        if custom_id.contains("upsample") {
            ActionKind::Upscale
        } else if custom_id.contains("variation") {
            ActionKind::Variation
        } else if custom_id.contains("reroll") {
            ActionKind::Reroll
        } else if custom_id.contains("CustomZoom") {
            ActionKind::CustomZoom
        } else if custom_id.contains("PanModal") || custom_id.contains("pan_") {
            ActionKind::CustomPan
        } else {
            ActionKind::Other
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Upscale => "upscale",
            ActionKind::Variation => "variation",
            ActionKind::Reroll => "reroll",
            ActionKind::CustomPan => "customPan",
            ActionKind::CustomZoom => "customZoom",
            ActionKind::Other => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        assert_eq!(upscale(2, "h1").unwrap(), "MJ::JOB::upsample::2::h1");
        assert_eq!(variation(4, "h1").unwrap(), "MJ::JOB::variation::4::h1");
        assert!(upscale(5, "h1").is_err());
        assert_eq!(reroll("h1"), "MJ::JOB::reroll::0::h1::SOLO");
        assert_eq!(pan(PanDirection::Up, "h1"), "MJ::JOB::pan_up::1::h1::SOLO");
        assert_eq!(zoom_out(ZoomLevel::OneAndHalf, "h1"), "MJ::Outpaint::75::1::h1::SOLO");
        assert_eq!(
            zoom_out("high".parse().unwrap(), "h1"),
            "MJ::JOB::high_variation::1::h1::SOLO"
        );
    }

    #[test]
    fn test_modal_forms() {
        let pan = modal_form("MJ::JOB::pan_left::1::h1::SOLO", false).unwrap();
        assert_eq!(pan.custom_id, "MJ::PanModal::left::h1::1");
        assert_eq!(pan.input_id, "MJ::PanModal::prompt");

        let zoom = modal_form(&zoom_out(ZoomLevel::Custom, "h1"), false).unwrap();
        assert_eq!(zoom.custom_id, "MJ::OutpaintCustomZoomModal::h1");

        let vary = variation(3, "h1").unwrap();
        assert!(modal_form(&vary, false).is_none());
        assert_eq!(modal_form(&vary, true).unwrap().custom_id, "MJ::RemixModal::h1::3::1");

        assert!(modal_form(&upscale(1, "h1").unwrap(), true).is_none());
        assert!(modal_form(&reroll("h1"), true).is_none());
    }

    #[test]
    fn test_classify() {
        assert_eq!(ActionKind::classify("MJ::JOB::upsample::1::h"), ActionKind::Upscale);
        assert_eq!(ActionKind::classify("MJ::JOB::low_variation::1::h::SOLO"), ActionKind::Variation);
        assert_eq!(ActionKind::classify("MJ::JOB::pan_left::1::h::SOLO"), ActionKind::CustomPan);
        assert_eq!(ActionKind::classify("MJ::CustomZoom::h"), ActionKind::CustomZoom);
        assert_eq!(ActionKind::classify("MJ::Settings::x").as_str(), "other");
    }
}

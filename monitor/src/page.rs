use crate::errors::{Error, Result};
use crate::series::Chart;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const STATUS_INFO: &str = "status_info";
pub const SD_INFO: &str = "sd_info";
pub const LAST_READING: &str = "last_reading";
pub const DATETIME: &str = "datetime";

/// Element writes the dispatcher performs. Implemented by whatever renders
/// the page; only ids the page template declares can be written.
pub trait UiSurface {
    fn set_text(&mut self, id: &str, text: &str) -> Result<()>;
    fn set_checked(&mut self, id: &str, checked: bool) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Element {
    Text { text: String },
    Checkbox { checked: bool },
}

/// In-memory page template: a fixed set of named elements.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Elements {
    elements: BTreeMap<String, Element>,
}

impl Elements {
    /// Status cards plus a checkbox `<id>` and label `<id>s` per GPIO.
    pub fn dashboard<S: AsRef<str>>(gpios: &[S]) -> Self {
        let mut elements = Self::default();
        elements.add_text(STATUS_INFO, "Stand-by");
        elements.add_text(SD_INFO, "Ok");
        elements.add_text(LAST_READING, "");
        elements.add_text(DATETIME, "");
        for gpio in gpios {
            let gpio = gpio.as_ref();
            elements.add_checkbox(gpio);
            elements.add_text(&gpio_label(gpio), "OFF");
        }
        elements
    }

    pub fn add_text(&mut self, id: &str, text: &str) {
        self.elements.insert(
            id.to_string(),
            Element::Text {
                text: text.to_string(),
            },
        );
    }

    pub fn add_checkbox(&mut self, id: &str) {
        self.elements
            .insert(id.to_string(), Element::Checkbox { checked: false });
    }

    pub fn get(&self, id: &str) -> Option<&Element> {
        self.elements.get(id)
    }

    pub fn text(&self, id: &str) -> Option<&str> {
        match self.elements.get(id) {
            Some(Element::Text { text }) => Some(text),
            _ => None,
        }
    }

    pub fn checked(&self, id: &str) -> Option<bool> {
        match self.elements.get(id) {
            Some(Element::Checkbox { checked }) => Some(*checked),
            _ => None,
        }
    }
}

impl UiSurface for Elements {
    fn set_text(&mut self, id: &str, text: &str) -> Result<()> {
        match self.elements.get_mut(id) {
            Some(Element::Text { text: current }) => {
                current.clear();
                current.push_str(text);
                Ok(())
            }
            _ => Err(Error::MissingUiElement(id.to_string())),
        }
    }

    fn set_checked(&mut self, id: &str, checked: bool) -> Result<()> {
        match self.elements.get_mut(id) {
            Some(Element::Checkbox { checked: current }) => {
                *current = checked;
                Ok(())
            }
            _ => Err(Error::MissingUiElement(id.to_string())),
        }
    }
}

/// Label element paired with a GPIO checkbox.
pub fn gpio_label(gpio: &str) -> String {
    format!("{}s", gpio)
}

pub fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

/// Text shown in the `datetime` card.
pub fn datetime_text(now: DateTime<Local>) -> String {
    now.format("%a, %d %B %Y, %H:%M:%S").to_string()
}

/// Everything one dashboard session renders.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub chart: Chart,
    pub elements: Elements,
}

pub type SharedPage = Arc<RwLock<Page>>;

impl Page {
    pub fn new(chart: Chart, elements: Elements) -> Self {
        Self { chart, elements }
    }

    pub fn shared(self) -> SharedPage {
        Arc::new(RwLock::new(self))
    }
}

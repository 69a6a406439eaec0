use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct Channels {
    pub from_grobro: broadcast::Sender<grobro::ChannelData>,
    pub to_grobro: broadcast::Sender<grobro::ChannelData>,
    pub from_homeassistant: broadcast::Sender<mqtt::ChannelData>,
    pub to_homeassistant: broadcast::Sender<mqtt::ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            from_grobro: Self::channel(),
            to_grobro: Self::channel(),
            from_homeassistant: Self::channel(),
            to_homeassistant: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(2048).0
    }
}

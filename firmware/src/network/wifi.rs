use cyw43::{Control, JoinOptions};
use defmt::{info, warn};
use pico_telemetry::{Error, net::Radio};

pub(crate) struct Cyw43Radio {
    control: Control<'static>,
}

impl Cyw43Radio {
    pub(crate) fn new(control: Control<'static>) -> Self {
        Self { control }
    }
}

impl Radio for Cyw43Radio {
    async fn join(&mut self, ssid: &str, password: &str) -> pico_telemetry::Result<()> {
        info!("Joining WiFi network {}", ssid);

        let options = if password.is_empty() {
            JoinOptions::new_open()
        } else {
            JoinOptions::new(password.as_bytes())
        };

        self.control.join(ssid, options).await.map_err(|e| {
            warn!("Failed to join WiFi network with status {}", e.status);
            Error::JoinFailed
        })
    }
}

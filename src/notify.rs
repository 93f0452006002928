use std::time::Duration;

use chrono::Local;
use color_eyre::{Result, eyre::Context};
use log::{error, info};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use strum::VariantArray;
use strum_macros::VariantArray;

use crate::diff::Reason;
use crate::source::{Observation, Product};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
const BOT_NAME: &str = "Steam Price Bot";
const STEAM_ICON: &str = "https://cdn.iconscout.com/icon/free/png-256/steam-3-226995.png";
const EMOJI_GAME: &str = "🎮";
const EMOJI_FIRE: &str = "🔥";

/// Embed colour, picked by how deep the discount is. Ordered deepest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, VariantArray)]
pub enum ColorTier {
    Green,
    Orange,
    Yellow,
    Red,
}

impl ColorTier {
    pub const fn min_discount(&self) -> u8 {
        match self {
            Self::Green => 75,
            Self::Orange => 50,
            Self::Yellow => 25,
            Self::Red => 0,
        }
    }

    pub fn for_discount(discount_percent: u8) -> Self {
        Self::VARIANTS
            .iter()
            .copied()
            .find(|tier| discount_percent >= tier.min_discount())
            .unwrap_or(Self::Red)
    }

    pub const fn rgb(&self) -> u32 {
        match self {
            Self::Green => 0x00ff00,
            Self::Orange => 0xffa500,
            Self::Yellow => 0xffff00,
            Self::Red => 0xff0000,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookMessage {
    pub username: String,
    pub avatar_url: String,
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub url: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub footer: EmbedFooter,
    pub thumbnail: EmbedImage,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

fn field(name: &str, value: String, inline: bool) -> EmbedField {
    EmbedField {
        name: name.into(),
        value,
        inline,
    }
}

pub fn render_deal(product: &Product, observation: &Observation, reason: Reason) -> WebhookMessage {
    let link = product.store_link();
    let mut fields = vec![
        field("Game", format!("[{}]({link})", product.name), true),
        field(
            "Discount",
            format!("**-{}%**", observation.discount_percent),
            true,
        ),
        field(
            "Current price",
            format!("**{}**", observation.price_formatted),
            true,
        ),
    ];
    if !observation.original_price_formatted.is_empty()
        && observation.original_price_formatted != observation.price_formatted
    {
        fields.push(field(
            "Original price",
            format!("~~{}~~", observation.original_price_formatted),
            false,
        ));
    }

    let embed = Embed {
        title: format!("{EMOJI_GAME} New Steam deal!"),
        description: format!("{EMOJI_FIRE} **{reason}**"),
        url: link.to_string(),
        color: ColorTier::for_discount(observation.discount_percent).rgb(),
        fields,
        footer: EmbedFooter {
            text: format!(
                "Steam Price Tracker • {}",
                Local::now().format("%Y-%m-%d %H:%M:%S")
            ),
        },
        thumbnail: EmbedImage {
            url: STEAM_ICON.into(),
        },
    };

    WebhookMessage {
        username: BOT_NAME.into(),
        avatar_url: STEAM_ICON.into(),
        embeds: vec![embed],
    }
}

/// Where deal notifications go. Delivery failures are reported as `false`.
pub trait Sink {
    fn notify(&self, product: &Product, observation: &Observation, reason: Reason) -> bool;
}

pub struct DiscordWebhook {
    client: Client,
    url: Option<String>,
}

impl DiscordWebhook {
    pub fn new(url: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .wrap_err("failed to build webhook client")?;
        Ok(Self { client, url })
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    fn deliver(&self, url: &str, message: &WebhookMessage) -> Result<StatusCode> {
        let url = url.parse::<Url>().wrap_err("invalid webhook url")?;
        let res = self.client.post(url).json(message).send()?;
        Ok(res.status())
    }
}

impl Sink for DiscordWebhook {
    fn notify(&self, product: &Product, observation: &Observation, reason: Reason) -> bool {
        let Some(url) = &self.url else {
            error!(
                "DISCORD_WEBHOOK_URL is not set, not notifying for {}",
                product.name
            );
            return false;
        };

        let message = render_deal(product, observation, reason);
        match self.deliver(url, &message) {
            Ok(StatusCode::OK | StatusCode::NO_CONTENT) => {
                info!("Sent notification for {}", product.name);
                true
            }
            Ok(status) => {
                error!("Webhook rejected notification for {}: {status}", product.name);
                false
            }
            Err(e) => {
                error!("Failed to reach webhook for {}: {e:#}", product.name);
                false
            }
        }
    }
}

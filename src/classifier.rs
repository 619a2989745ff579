//! Attachment classification and channel rule matching
//!
//! Everything here is pure: no I/O, no clock, no shared state. Given the same
//! message, rule and policy, [`classify`] always returns the same answer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use utoipa::ToSchema;

use crate::config::ExportConfig;
use crate::types::{Channel, ChannelId, Media, MessageRef, SkipReason};

/// Channel rule: which channel it applies to and which extensions it keeps
///
/// A channel matches when its id equals `channel_id` or its title contains
/// `title_match`. Rules are evaluated in configuration order and the first
/// match wins; see [`match_rule`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChannelRule {
    /// Exact channel id to match
    #[serde(default, rename = "id")]
    pub channel_id: Option<ChannelId>,

    /// Substring of the channel title to match
    ///
    /// Unlike plain substring containment, an empty value never matches, so a
    /// rule that only sets `channel_id` does not catch every channel.
    #[serde(default, rename = "title")]
    pub title_match: String,

    /// Allowed extensions including the dot (empty = no restriction)
    #[serde(default, alias = "allowedMediaExt")]
    pub allowed_extensions: BTreeSet<String>,
}

impl ChannelRule {
    /// Rule that matches by title substring only
    pub fn for_title(title_match: impl Into<String>) -> Self {
        Self {
            channel_id: None,
            title_match: title_match.into(),
            allowed_extensions: BTreeSet::new(),
        }
    }

    /// Rule pinned to one resolved channel, used by bulk exports
    pub fn for_channel(channel: &Channel, allowed_extensions: &[String]) -> Self {
        Self {
            channel_id: Some(channel.id),
            title_match: channel.title.clone(),
            allowed_extensions: allowed_extensions.iter().cloned().collect(),
        }
    }

    /// Replace the allow-list
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this rule applies to `channel`
    pub fn matches(&self, channel: &Channel) -> bool {
        if self.channel_id == Some(channel.id) {
            return true;
        }
        !self.title_match.is_empty() && channel.title.contains(&self.title_match)
    }
}

/// First rule (in order) that matches `channel`
pub fn match_rule<'a>(rules: &'a [ChannelRule], channel: &Channel) -> Option<&'a ChannelRule> {
    rules.iter().find(|rule| rule.matches(channel))
}

/// Size policy applied after the extension check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassifyPolicy {
    /// Maximum declared size in bytes
    pub max_file_size: u64,
    /// Treat a missing declared size as 0 (true) or as oversize (false)
    pub allow_missing_size: bool,
}

impl Default for ClassifyPolicy {
    fn default() -> Self {
        Self::from(&ExportConfig::default())
    }
}

impl From<&ExportConfig> for ClassifyPolicy {
    fn from(config: &ExportConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
            allow_missing_size: config.allow_missing_size,
        }
    }
}

/// Classifier decision for one message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Download it under this local filename
    Keep(String),
    /// Leave it alone
    Skip(SkipReason),
}

/// Decide whether a message's attachment should be fetched, and under what name.
pub fn classify(message: &MessageRef, rule: &ChannelRule, policy: &ClassifyPolicy) -> Classification {
    let (attachment_id, declared_name, declared_size) = match &message.media {
        None => return Classification::Skip(SkipReason::NoMedia),
        Some(Media::Document {
            attachment_id,
            file_name,
            size_bytes,
        }) => (*attachment_id, file_name.as_deref(), *size_bytes),
        // Photos are reserved for future handling
        Some(Media::Photo { .. }) | Some(Media::Unsupported { .. }) => {
            return Classification::Skip(SkipReason::UnsupportedMediaType);
        }
    };

    let file_name = resolve_file_name(declared_name, attachment_id);

    if !rule.allowed_extensions.is_empty()
        && !rule.allowed_extensions.contains(extension_of(&file_name))
    {
        return Classification::Skip(SkipReason::ExtensionNotAllowed);
    }

    let size = match declared_size {
        Some(size) => size,
        None if policy.allow_missing_size => 0,
        None => return Classification::Skip(SkipReason::ExceedsMaxSize),
    };
    if size > policy.max_file_size {
        return Classification::Skip(SkipReason::ExceedsMaxSize);
    }

    Classification::Keep(file_name)
}

/// Declared filename reduced to a single safe path component, or `file_<id>.bin`.
pub fn resolve_file_name(declared: Option<&str>, attachment_id: i64) -> String {
    let sanitized = declared.map(|name| {
        name.chars()
            .filter(|c| *c != '\0')
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect::<String>()
    });

    match sanitized {
        Some(name) if !name.trim().is_empty() && name != "." && name != ".." => name,
        _ => format!("file_{}.bin", attachment_id),
    }
}

/// Extension of `file_name` including the dot, or `""` when there is none.
///
/// Leading dots belong to the stem, so `.env` has no extension while
/// `archive.tar.gz` has `.gz`.
pub fn extension_of(file_name: &str) -> &str {
    let stem_start = file_name.len() - file_name.trim_start_matches('.').len();
    match file_name[stem_start..].rfind('.') {
        Some(idx) => &file_name[stem_start + idx..],
        None => "",
    }
}

/// Parse a comma-separated extension list from the trigger.
///
/// Items are trimmed, empty items dropped, and a missing leading dot added,
/// so `"pdf, .mp4,,"` becomes `[".pdf", ".mp4"]`.
pub fn normalize_extensions<'a, I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out: Vec<String> = Vec::new();
    for item in raw.into_iter().flat_map(|s| s.split(',')) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let ext = if item.starts_with('.') {
            item.to_string()
        } else {
            format!(".{}", item)
        };
        if !out.contains(&ext) {
            out.push(ext);
        }
    }
    out
}

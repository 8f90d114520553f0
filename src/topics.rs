// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topic namespace of a device.
//!
//! One configured root `R` yields three fixed prefixes:
//!
//! ```text
//! R/set/<command>                 inbound commands
//! R/status/<field>                outbound state (retained)
//! <first segment of R>/reset/...  forwarded to the device untouched
//! ```

/// Topic on which alert packets are published.
pub const ALERT_TOPIC: &str = "alert";

/// The immutable topic namespace derived from a device's topic root.
///
/// # Examples
///
/// ```
/// use mqtt_shadow::Topics;
///
/// let topics = Topics::new("home/thermostat");
/// assert_eq!(topics.set_root(), "home/thermostat/set/");
/// assert_eq!(topics.status_topic("temperature"), "home/thermostat/status/temperature");
/// assert_eq!(topics.reset_filter(), "home/reset/#");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    root: String,
    set_root: String,
    status_root: String,
    reset_root: String,
}

impl Topics {
    /// Derives the namespace from a topic root.
    ///
    /// A trailing `/` on the root is ignored.
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        let mut root = root.into();
        while root.ends_with('/') {
            root.pop();
        }
        let first_segment = root.split('/').next().unwrap_or_default();

        Self {
            set_root: format!("{root}/set/"),
            status_root: format!("{root}/status/"),
            reset_root: format!("{first_segment}/reset/"),
            root,
        }
    }

    /// Returns the topic root.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Returns the command prefix (`R/set/`).
    #[must_use]
    pub fn set_root(&self) -> &str {
        &self.set_root
    }

    /// Returns the status prefix (`R/status/`).
    #[must_use]
    pub fn status_root(&self) -> &str {
        &self.status_root
    }

    /// Returns the reset prefix (`<first segment>/reset/`).
    #[must_use]
    pub fn reset_root(&self) -> &str {
        &self.reset_root
    }

    /// Wildcard filter for inbound commands.
    #[must_use]
    pub fn set_filter(&self) -> String {
        format!("{}#", self.set_root)
    }

    /// Wildcard filter for published state.
    #[must_use]
    pub fn status_filter(&self) -> String {
        format!("{}#", self.status_root)
    }

    /// Wildcard filter for reset traffic.
    #[must_use]
    pub fn reset_filter(&self) -> String {
        format!("{}#", self.reset_root)
    }

    /// Status topic for a single state field.
    #[must_use]
    pub fn status_topic(&self, field: &str) -> String {
        format!("{}{field}", self.status_root)
    }

    /// Strips the command prefix, returning the command name.
    #[must_use]
    pub fn command_name<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic.strip_prefix(self.set_root.as_str())
    }

    /// Strips the status prefix, returning the field name.
    #[must_use]
    pub fn field_name<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.status_root.as_str())
            .filter(|field| !field.is_empty())
    }

    /// Returns `true` if the topic lies in the reset namespace.
    #[must_use]
    pub fn is_reset(&self, topic: &str) -> bool {
        topic.starts_with(self.reset_root.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_prefixes_from_single_segment_root() {
        let topics = Topics::new("denon");
        assert_eq!(topics.set_root(), "denon/set/");
        assert_eq!(topics.status_root(), "denon/status/");
        assert_eq!(topics.reset_root(), "denon/reset/");
        assert_eq!(topics.set_filter(), "denon/set/#");
    }

    #[test]
    fn reset_uses_first_segment() {
        let topics = Topics::new("autelis/pool");
        assert_eq!(topics.reset_root(), "autelis/reset/");
        assert!(topics.is_reset("autelis/reset/now"));
        assert!(!topics.is_reset("autelis/pool/set/reset"));
    }

    #[test]
    fn trailing_slash_is_ignored() {
        assert_eq!(Topics::new("tivo/"), Topics::new("tivo"));
    }

    #[test]
    fn command_name_strips_prefix() {
        let topics = Topics::new("hvac/upstairs");
        assert_eq!(topics.command_name("hvac/upstairs/set/mode"), Some("mode"));
        assert_eq!(
            topics.command_name("hvac/upstairs/set/fan/speed"),
            Some("fan/speed")
        );
        assert_eq!(topics.command_name("hvac/upstairs/status/mode"), None);
    }

    #[test]
    fn field_name_strips_status_prefix() {
        let topics = Topics::new("autelis/pool");
        assert_eq!(topics.status_filter(), "autelis/pool/status/#");
        assert_eq!(topics.field_name("autelis/pool/status/aux1"), Some("aux1"));
        assert_eq!(topics.field_name("autelis/pool/status/"), None);
        assert_eq!(topics.field_name("autelis/pool/set/aux1"), None);
    }
}

//! The platform's device-metadata record and its file naming scheme.

use std::{collections::BTreeMap, path::Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::registry::{EntryFields, FieldError, FileProvider, RegistryEntry};

pub const DEVICE_FILE_SUFFIX: &str = "json";

/// Metadata record for one device known to the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
	/// Unique identifier, stable for the device's lifetime.
	pub id: Uuid,

	/// Human-readable name, shown in the UI and embedded in the file name.
	pub label: String,

	#[serde(default)]
	pub enabled: bool,

	/// Channel id to item binding, e.g. `power` -> `kitchen_light_power`.
	#[serde(default)]
	pub channels: BTreeMap<String, String>,

	pub created_at: DateTime<Utc>,

	pub updated_at: DateTime<Utc>,
}

impl DeviceEntry {
	pub fn new(label: impl Into<String>) -> Self {
		let now = Utc::now();

		Self {
			id: Uuid::new_v4(),
			label: label.into(),
			enabled: true,
			channels: BTreeMap::new(),
			created_at: now,
			updated_at: now,
		}
	}
}

impl RegistryEntry for DeviceEntry {
	type Key = Uuid;

	fn id(&self) -> Uuid {
		self.id
	}
}

impl EntryFields for DeviceEntry {
	fn get(&self, name: &str) -> Option<Value> {
		match name {
			"id" => Some(Value::String(self.id.to_string())),
			"label" => Some(Value::String(self.label.clone())),
			"enabled" => Some(Value::Bool(self.enabled)),
			"channels" => serde_json::to_value(&self.channels).ok(),
			_ => None,
		}
	}

	fn set(&mut self, name: &str, value: Value) -> Result<(), FieldError> {
		let invalid = |reason: &str| FieldError::InvalidValue {
			field: name.to_string(),
			reason: reason.to_string(),
		};

		match name {
			"label" => {
				self.label = value
					.as_str()
					.ok_or_else(|| invalid("expected a string"))?
					.to_string();
			}
			"enabled" => {
				self.enabled = value.as_bool().ok_or_else(|| invalid("expected a bool"))?;
			}
			"channels" => {
				self.channels = serde_json::from_value(value)
					.map_err(|e| invalid(&format!("expected a string map: {e}")))?;
			}
			"id" => return Err(invalid("id is immutable")),
			_ => return Err(FieldError::UnknownField(name.to_string())),
		}

		self.updated_at = Utc::now();

		Ok(())
	}
}

/// Names device files `<label-slug>-<id>.json`.
///
/// The label is part of the canonical name, so relabeling a device makes the
/// registry rename its file on the next save.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceFileProvider;

impl FileProvider<DeviceEntry> for DeviceFileProvider {
	fn file_name(&self, entry: &DeviceEntry) -> String {
		format!("{}-{}.{DEVICE_FILE_SUFFIX}", slug(&entry.label), entry.id)
	}

	fn matches(&self, path: &Path) -> bool {
		path.extension()
			.map(|ext| ext == DEVICE_FILE_SUFFIX)
			.unwrap_or(false)
	}
}

fn slug(label: &str) -> String {
	let mut out = String::with_capacity(label.len());
	let mut last_dash = true;

	for c in label.chars() {
		if c.is_ascii_alphanumeric() {
			out.push(c.to_ascii_lowercase());
			last_dash = false;
		} else if !last_dash {
			out.push('-');
			last_dash = true;
		}
	}

	while out.ends_with('-') {
		out.pop();
	}

	if out.is_empty() {
		out.push_str("device");
	}

	out
}

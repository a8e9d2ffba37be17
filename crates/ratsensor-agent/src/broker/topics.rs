use crate::config::MqttConfig;

/// Sanitize a device id for use as a topic segment.
///
/// MQTT topics cannot contain '#' or '+' wildcards, and should avoid spaces
/// and extra levels.
pub fn sanitize_topic_segment(s: &str) -> String {
    s.replace(['#', '+', ' ', '/'], "_")
}

/// Substitute the device id into a topic template.
///
/// Both `{device_id}` and `{}` are placeholders. A template without a
/// placeholder is returned unchanged.
pub fn render_topic(template: &str, device_id: &str) -> String {
    let segment = sanitize_topic_segment(device_id);
    template
        .replace("{device_id}", &segment)
        .replace("{}", &segment)
}

/// Concrete topics for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub sensor: String,
    pub info: String,
    pub status: String,
    /// Inbound admin topic; `None` when admin listening is off.
    pub admin: Option<String>,
}

impl Topics {
    pub fn new(config: &MqttConfig, device_id: &str) -> Self {
        Self {
            sensor: render_topic(&config.sensor_topic, device_id),
            info: render_topic(&config.info_topic, device_id),
            status: render_topic(&config.status_topic, device_id),
            admin: config
                .admin_topic_template()
                .map(|t| render_topic(t, device_id)),
        }
    }
}

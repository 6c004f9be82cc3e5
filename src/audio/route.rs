//! Source node selection for audio capture

/// Properties of one audio source node seen in the registry
#[derive(Debug, Clone, Default)]
pub struct SourceNodeInfo {
    pub id: u32,
    /// `node.name`
    pub name: String,
    /// `node.description`
    pub description: String,
    /// `device.description`
    pub device_description: String,
    /// `device.bus-path`, e.g. `usb-0000:00:14.0-2`
    pub bus_path: String,
    /// `device.bus`
    pub bus: String,
}

/// What the caller knows about the source it wants
#[derive(Debug, Clone, Default)]
pub struct RouteHints {
    /// Exact bus path of the capture card
    pub bus_path: Option<String>,
    /// Free-form label matched against node descriptions
    pub description: Option<String>,
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Whether a node's labels match a free-form hint
///
/// Matches case-insensitively against the node description, node name and
/// device description. A hint of the form `"Vendor: Detail"` also matches
/// on its vendor prefix alone, since drivers often expose only that part.
fn label_matches(node: &SourceNodeInfo, hint: &str) -> bool {
    let hint = hint.trim();
    if hint.is_empty() {
        return false;
    }

    let fields = [
        node.description.as_str(),
        node.name.as_str(),
        node.device_description.as_str(),
    ];
    if fields.iter().any(|f| contains_ci(f, hint)) {
        return true;
    }

    if let Some((prefix, _)) = hint.split_once(':') {
        let prefix = prefix.trim();
        if !prefix.is_empty() {
            return fields.iter().any(|f| contains_ci(f, prefix));
        }
    }
    false
}

/// Pick the source node matching the hints
///
/// A bus path match on any node beats a label match on any node; within a
/// tier the first node in registry order wins. Returns `None` when nothing
/// matches or no hints were given.
pub fn match_source(nodes: &[SourceNodeInfo], hints: &RouteHints) -> Option<u32> {
    if let Some(bus_path) = hints.bus_path.as_deref() {
        let bus_hit = nodes
            .iter()
            .find(|n| n.bus_path == bus_path || n.bus == bus_path);
        if let Some(node) = bus_hit {
            return Some(node.id);
        }
    }

    if let Some(label) = hints.description.as_deref() {
        return nodes.iter().find(|n| label_matches(n, label)).map(|n| n.id);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u32, name: &str, description: &str, bus_path: &str) -> SourceNodeInfo {
        SourceNodeInfo {
            id,
            name: name.to_string(),
            description: description.to_string(),
            bus_path: bus_path.to_string(),
            ..SourceNodeInfo::default()
        }
    }

    #[test]
    fn bus_path_beats_label() {
        let nodes = [
            node(10, "alsa_input.usb-cap", "HDMI Capture", ""),
            node(20, "alsa_input.pci-card", "Onboard", "usb-0000:00:14.0-2"),
        ];
        let hints = RouteHints {
            bus_path: Some("usb-0000:00:14.0-2".to_string()),
            description: Some("HDMI Capture".to_string()),
        };
        assert_eq!(match_source(&nodes, &hints), Some(20));
    }

    #[test]
    fn label_matches_case_insensitively() {
        let nodes = [
            node(10, "alsa_input.onboard", "Built-in Audio", ""),
            node(20, "alsa_input.usb-cap", "Elgato HD60 Analog Stereo", ""),
        ];
        let hints = RouteHints {
            bus_path: None,
            description: Some("elgato hd60".to_string()),
        };
        assert_eq!(match_source(&nodes, &hints), Some(20));
    }

    #[test]
    fn label_falls_back_to_colon_prefix() {
        let nodes = [node(30, "alsa_input.usb-cap", "Elgato HD60", "")];
        let hints = RouteHints {
            bus_path: None,
            description: Some("Elgato: HDMI In".to_string()),
        };
        assert_eq!(match_source(&nodes, &hints), Some(30));
    }

    #[test]
    fn no_hints_matches_nothing() {
        let nodes = [node(10, "alsa_input.onboard", "Built-in Audio", "")];
        assert_eq!(match_source(&nodes, &RouteHints::default()), None);
    }

    #[test]
    fn first_registry_match_wins() {
        let nodes = [
            node(1, "alsa_input.a", "HDMI Capture A", ""),
            node(2, "alsa_input.b", "HDMI Capture B", ""),
        ];
        let hints = RouteHints {
            bus_path: None,
            description: Some("HDMI Capture".to_string()),
        };
        assert_eq!(match_source(&nodes, &hints), Some(1));
    }

    #[test]
    fn missing_bus_path_does_not_fall_through_silently() {
        // Bus hint misses, label hint still resolves.
        let nodes = [node(5, "alsa_input.usb-cap", "HDMI Capture", "usb-1")];
        let hints = RouteHints {
            bus_path: Some("usb-9".to_string()),
            description: Some("HDMI Capture".to_string()),
        };
        assert_eq!(match_source(&nodes, &hints), Some(5));
    }
}

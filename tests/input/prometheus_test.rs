//! Alertmanager grouping, instance naming and routing.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};

use cpthook::input::prometheus::{Alert, AlertStatus, PrometheusSource};
use cpthook::input::SourceError;
use cpthook::routing::ChannelMapping;

const STARTED: &str = "2024-05-01T10:00:00Z";
const ZERO: &str = "0001-01-01T00:00:00Z";
const ENDED: &str = "2024-05-01T10:07:00Z";

fn source(filter: Option<&str>) -> PrometheusSource {
    let mapping = ChannelMapping::with_default("#alerts").explicit("DiskFull", ["#storage"]);
    match PrometheusSource::new(mapping, filter) {
        Ok(source) => source,
        Err(e) => panic!("filter should compile: {e}"),
    }
}

fn alert(name: &str, instance: &str, ends: &str, value: &str) -> Value {
    json!({
        "labels": { "alertname": name, "instance": instance },
        "annotations": { "description": format!("{name} on {instance}"), "value": value },
        "startsAt": STARTED,
        "endsAt": ends
    })
}

fn body(alerts: Vec<Value>) -> Vec<u8> {
    json!({ "status": "firing", "alerts": alerts }).to_string().into_bytes()
}

#[test]
fn firing_and_resolved_are_separate_messages_firing_first() {
    let payload = body(vec![
        alert("HighLoad", "web-3:9100", ENDED, ""),
        alert("HighLoad", "web-1:9100", ZERO, "4.2"),
        alert("HighLoad", "web-2:9100", ZERO, "3.9"),
    ]);

    let rendered = source(None).render(&payload);
    let notifications = match rendered {
        Ok(n) => n,
        Err(e) => panic!("render failed: {e}"),
    };
    assert_eq!(notifications.len(), 2);

    assert_eq!(
        notifications[0].lines,
        vec![
            "[\x0305FIRING\x03:2] HighLoad - HighLoad on web-1:9100".to_owned(),
            "→ web-1:9100 (4.2), web-2:9100 (3.9)".to_owned(),
        ]
    );
    assert_eq!(
        notifications[1].lines,
        vec![
            "[\x0303RESOLVED\x03:1] HighLoad".to_owned(),
            "→ web-3:9100".to_owned(),
        ]
    );
    assert_eq!(
        notifications[0].channels,
        BTreeSet::from(["#alerts".to_owned()])
    );
}

#[test]
fn only_resolved_alerts_yield_one_message() {
    let payload = body(vec![alert("HighLoad", "web-1", ENDED, "")]);
    let notifications = source(None).render(&payload);
    assert!(matches!(notifications, Ok(n) if n.len() == 1 && n[0].lines[0].contains("RESOLVED")));
}

#[test]
fn routes_by_alert_name() {
    let payload = body(vec![alert("DiskFull", "db-1", ZERO, "97%")]);
    let notifications = source(None).render(&payload);
    assert!(matches!(
        notifications,
        Ok(n) if n[0].channels == BTreeSet::from(["#storage".to_owned()])
    ));
}

#[test]
fn empty_alert_list_renders_nothing() {
    let notifications = source(None).render(&body(Vec::new()));
    assert!(matches!(notifications, Ok(n) if n.is_empty()));
}

#[test]
fn malformed_body_is_rejected() {
    let rendered = source(None).render(b"alerts: none");
    assert!(matches!(rendered, Err(SourceError::Decode(_))));
}

#[test]
fn invalid_filter_is_rejected() {
    let built = PrometheusSource::new(ChannelMapping::with_default("#alerts"), Some("(unclosed"));
    assert!(matches!(built, Err(SourceError::Pattern(_))));
}

fn labelled(labels: &[(&str, &str)]) -> Alert {
    Alert {
        labels: labels
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<BTreeMap<_, _>>(),
        ..Alert::default()
    }
}

#[test]
fn hostname_filter_shortens_instance() {
    let source = source(Some(r"^([^.]+)\.example\.com"));
    let alert = labelled(&[("alertname", "Down"), ("instance", "web-1.example.com:9100")]);
    assert_eq!(source.instance_name(&alert), "web-1");
}

#[test]
fn non_matching_instance_is_kept() {
    let source = source(Some(r"^([^.]+)\.example\.com"));
    let alert = labelled(&[("instance", "web-1.other.org")]);
    assert_eq!(source.instance_name(&alert), "web-1.other.org");
}

#[test]
fn ip_addresses_are_never_shortened() {
    let source = source(Some(r"^(\d+)\."));
    let alert = labelled(&[("instance", "10.0.0.7")]);
    assert_eq!(source.instance_name(&alert), "10.0.0.7");
}

#[test]
fn missing_instance_falls_back_to_alert_name_then_unknown() {
    let source = source(None);
    assert_eq!(source.instance_name(&labelled(&[("alertname", "Watchdog")])), "Watchdog");
    assert_eq!(source.instance_name(&labelled(&[])), "unknown");
}

#[test]
fn empty_filter_means_no_filter() {
    let source = source(Some(""));
    let alert = labelled(&[("instance", "web-1.example.com")]);
    assert_eq!(source.instance_name(&alert), "web-1.example.com");
}

#[test]
fn status_compares_end_with_start() {
    let firing: Alert = match serde_json::from_value(alert("A", "h", ZERO, "")) {
        Ok(alert) => alert,
        Err(e) => panic!("alert should decode: {e}"),
    };
    assert_eq!(firing.status(), AlertStatus::Firing);

    let resolved: Alert = match serde_json::from_value(alert("A", "h", ENDED, "")) {
        Ok(alert) => alert,
        Err(e) => panic!("alert should decode: {e}"),
    };
    assert_eq!(resolved.status(), AlertStatus::Resolved);
}

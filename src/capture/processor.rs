//! Host-side event processing.
//!
//! Turns raw page events into committed [`ActionRecord`]s:
//! - text input is coalesced per field and committed on blur, on focus moving
//!   elsewhere, or after the debounce window of inactivity
//! - clicks and option/toggle changes commit immediately
//! - an event with the same method and description as the previous commit
//!   inside the dedup window is dropped
//! - events whose selector cannot be derived are discarded

use std::time::Duration;

use super::selector::derive_selector;
use super::types::{RawCaptureEvent, RawElement, RawEventKind};
use crate::codec::{ActionMethod, ActionRecord};
use crate::config::CaptureSettings;

#[derive(Debug, Clone)]
struct PendingInput {
    selector: String,
    label: String,
    value: String,
    last_ts: f64,
}

#[derive(Debug)]
pub struct CaptureProcessor {
    debounce_ms: f64,
    dedup_ms: f64,
    pending: Option<PendingInput>,
    last_emitted: Option<(String, f64)>,
    committed: Vec<ActionRecord>,
    unresolved: usize,
    deduplicated: usize,
}

impl CaptureProcessor {
    pub fn new(settings: &CaptureSettings) -> Self {
        Self::with_windows(settings.debounce, settings.dedup_window)
    }

    pub fn with_windows(debounce: Duration, dedup_window: Duration) -> Self {
        Self {
            debounce_ms: debounce.as_millis() as f64,
            dedup_ms: dedup_window.as_millis() as f64,
            pending: None,
            last_emitted: None,
            committed: Vec::new(),
            unresolved: 0,
            deduplicated: 0,
        }
    }

    pub fn ingest(&mut self, event: RawCaptureEvent) {
        let Some(selector) = derive_selector(&event.element) else {
            self.unresolved += 1;
            tracing::debug!(
                "discarding {:?} on <{}>: selector unresolved",
                event.kind,
                event.element.tag
            );
            return;
        };

        match event.kind {
            RawEventKind::Input => {
                if !event.element.is_text_entry() {
                    return;
                }
                let value = event.value.unwrap_or_default();
                let same_field = self
                    .pending
                    .as_ref()
                    .is_some_and(|pending| pending.selector == selector);
                if same_field {
                    if let Some(pending) = self.pending.as_mut() {
                        pending.value = value;
                        pending.last_ts = event.ts;
                    }
                } else {
                    // focus moved to another field
                    self.flush();
                    self.pending = Some(PendingInput {
                        selector,
                        label: label_or(&event.element, "field"),
                        value,
                        last_ts: event.ts,
                    });
                }
            }
            RawEventKind::Blur => {
                if self
                    .pending
                    .as_ref()
                    .is_some_and(|pending| pending.selector == selector)
                {
                    self.flush();
                }
            }
            RawEventKind::Click => {
                if is_passive_click(&event.element) {
                    return;
                }
                self.flush();
                let label = label_or(&event.element, &selector);
                let action = ActionRecord::new(selector, ActionMethod::Click)
                    .description(format!("click \"{}\"", label));
                self.emit(action, event.ts);
            }
            RawEventKind::Change => {
                if event.element.is_select() {
                    self.flush();
                    let value = event.value.unwrap_or_default();
                    let label = label_or(&event.element, &selector);
                    let action = ActionRecord::new(selector, ActionMethod::Select)
                        .description(format!("select \"{}\" in \"{}\"", value, label))
                        .arg(value);
                    self.emit(action, event.ts);
                } else if event.element.is_toggle() {
                    self.flush();
                    let checked = event.checked.unwrap_or(true);
                    let method = if checked {
                        ActionMethod::Check
                    } else {
                        ActionMethod::Uncheck
                    };
                    let label = label_or(&event.element, &selector);
                    let action = ActionRecord::new(selector, method)
                        .description(format!("{} \"{}\"", method, label));
                    self.emit(action, event.ts);
                } else if self
                    .pending
                    .as_ref()
                    .is_some_and(|pending| pending.selector == selector)
                {
                    // text fields fire change on blur
                    self.flush();
                }
            }
        }
    }

    /// Commit pending text input once it has been idle for the debounce window
    pub fn tick(&mut self, now: f64) {
        if self
            .pending
            .as_ref()
            .is_some_and(|pending| now - pending.last_ts >= self.debounce_ms)
        {
            self.flush();
        }
    }

    /// Commit pending text input unconditionally
    pub fn flush(&mut self) {
        if let Some(pending) = self.pending.take() {
            let action = ActionRecord::new(pending.selector, ActionMethod::Fill)
                .description(format!("fill \"{}\" with \"{}\"", pending.label, pending.value))
                .arg(pending.value);
            self.emit(action, pending.last_ts);
        }
    }

    /// Take everything committed so far
    pub fn take(&mut self) -> Vec<ActionRecord> {
        std::mem::take(&mut self.committed)
    }

    pub fn has_pending_input(&self) -> bool {
        self.pending.is_some()
    }

    pub fn unresolved(&self) -> usize {
        self.unresolved
    }

    pub fn deduplicated(&self) -> usize {
        self.deduplicated
    }

    fn emit(&mut self, action: ActionRecord, ts: f64) {
        let key = format!("{}|{}", action.method, action.description);
        if let Some((last_key, last_ts)) = &self.last_emitted {
            if *last_key == key && (ts - last_ts).abs() < self.dedup_ms {
                self.deduplicated += 1;
                return;
            }
        }
        self.last_emitted = Some((key, ts));
        self.committed.push(action);
    }
}

/// Clicks that are either focus clicks on text fields or duplicated by a change event
fn is_passive_click(element: &RawElement) -> bool {
    element.is_select() || element.is_toggle() || element.tag == "option" || element.is_text_entry()
}

fn label_or(element: &RawElement, fallback: &str) -> String {
    let label = element.label.trim();
    if label.is_empty() {
        fallback.to_string()
    } else {
        label.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::PathSegment;
    use pretty_assertions::assert_eq;

    fn element(tag: &str, id: &str, input_type: &str) -> RawElement {
        RawElement {
            tag: tag.to_string(),
            id: Some(id.to_string()),
            id_unique: true,
            path: vec![PathSegment {
                tag: tag.to_string(),
                index: 1,
            }],
            label: id.to_string(),
            input_type: input_type.to_string(),
        }
    }

    fn event(kind: RawEventKind, ts: f64, element: RawElement, value: Option<&str>) -> RawCaptureEvent {
        RawCaptureEvent {
            kind,
            ts,
            element,
            value: value.map(str::to_string),
            checked: None,
        }
    }

    fn processor() -> CaptureProcessor {
        CaptureProcessor::with_windows(Duration::from_millis(600), Duration::from_millis(500))
    }

    #[test]
    fn test_keystrokes_coalesce_into_one_fill() {
        let mut p = processor();
        let field = element("input", "username", "text");
        for (i, value) in ["a", "al", "ali", "alic", "alice"].iter().enumerate() {
            p.ingest(event(RawEventKind::Input, 100.0 * i as f64, field.clone(), Some(value)));
        }
        p.ingest(event(RawEventKind::Blur, 450.0, field, None));

        let actions = p.take();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].method, ActionMethod::Fill);
        assert_eq!(actions[0].selector, "#username");
        assert_eq!(actions[0].arguments, vec!["alice".to_string()]);
    }

    #[test]
    fn test_inactivity_commits_pending_input() {
        let mut p = processor();
        p.ingest(event(RawEventKind::Input, 1_000.0, element("input", "q", "search"), Some("rust")));
        p.tick(1_500.0);
        assert!(p.has_pending_input());
        p.tick(1_600.0);
        assert!(!p.has_pending_input());
        assert_eq!(p.take().len(), 1);
    }

    #[test]
    fn test_click_commits_pending_input_first() {
        let mut p = processor();
        p.ingest(event(RawEventKind::Input, 0.0, element("input", "password", "password"), Some("b")));
        p.ingest(event(RawEventKind::Click, 100.0, element("button", "login", ""), None));

        let actions = p.take();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].method, ActionMethod::Fill);
        assert_eq!(actions[1].method, ActionMethod::Click);
        assert_eq!(actions[1].selector, "#login");
    }

    #[test]
    fn test_near_duplicate_clicks_dropped_inside_window_only() {
        let mut p = processor();
        let button = element("button", "save", "");
        p.ingest(event(RawEventKind::Click, 0.0, button.clone(), None));
        p.ingest(event(RawEventKind::Click, 200.0, button.clone(), None));
        p.ingest(event(RawEventKind::Click, 800.0, button, None));
        assert_eq!(p.take().len(), 2);
        assert_eq!(p.deduplicated(), 1);
    }

    #[test]
    fn test_select_and_toggle_changes() {
        let mut p = processor();
        p.ingest(event(RawEventKind::Click, 0.0, element("select", "country", ""), None));
        p.ingest(event(RawEventKind::Change, 10.0, element("select", "country", ""), Some("fr")));
        let mut toggle = event(RawEventKind::Change, 900.0, element("input", "terms", "checkbox"), None);
        toggle.checked = Some(false);
        p.ingest(toggle);

        let actions = p.take();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].method, ActionMethod::Select);
        assert_eq!(actions[0].arguments, vec!["fr".to_string()]);
        assert_eq!(actions[1].method, ActionMethod::Uncheck);
    }

    #[test]
    fn test_unresolved_selector_discarded() {
        let mut p = processor();
        p.ingest(event(RawEventKind::Click, 0.0, RawElement::default(), None));
        assert!(p.take().is_empty());
        assert_eq!(p.unresolved(), 1);
    }
}

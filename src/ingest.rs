//! Typed knowledge and event ingestion.
//!
//! External loaders hand the engine typed data, never files. Static facts
//! arrive as a [`KnowledgeBase`] (predicate name to tuples); log entries
//! arrive as [`Event`]s, each of which expands into one or more facts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DataQualityError;
use crate::facts::{Fact, FactStore};
use crate::time::days_since;
use crate::value::Value;

/// Predicate names shared by ingestion and the standard rule catalog.
pub mod predicates {
    #![allow(missing_docs)]

    pub const HAS_ROLE: &str = "has_role";
    pub const IS_DOCTOR_OF: &str = "is_doctor_of";
    pub const OWNS_PHI_RECORD: &str = "owns_phi_record";
    pub const ROLE_CAN_ACCESS_TYPE: &str = "role_can_access_type";
    pub const HAS_UNRESTRICTED_STATUS: &str = "has_unrestricted_status";

    pub const READ_PHI: &str = "read_phi";
    pub const READ_ATTRIBUTE: &str = "read_attribute";
    pub const REQUEST_ACCESS: &str = "request_access";
    pub const REQUEST_DEACTIVATION: &str = "request_deactivation";
    pub const DEACTIVATION_FULFILLED: &str = "deactivation_fulfilled";
    pub const REQUEST_FULFILLED: &str = "request_fulfilled";
    pub const BREACH_DISCOVERED: &str = "breach_discovered";
    pub const BREACH_AFFECTS: &str = "breach_affects";
    pub const NOTIFICATION_SENT: &str = "notification_sent";
}

/// Days within which a data-subject request must be processed to count as
/// fulfilled.
pub const FULFILLMENT_WINDOW_DAYS: i64 = 30;

/// Static knowledge: predicate name to the list of tuples asserted under it.
pub type KnowledgeBase = BTreeMap<String, Vec<Vec<Value>>>;

/// Which kind of data-subject request a processing record closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Right-of-access request.
    Access,
    /// Erasure / deactivation request.
    Deactivation,
}

impl RequestKind {
    /// Predicate of the fulfillment marker for this kind.
    #[must_use]
    pub const fn fulfillment_predicate(self) -> &'static str {
        match self {
            Self::Access => predicates::REQUEST_FULFILLED,
            Self::Deactivation => predicates::DEACTIVATION_FULFILLED,
        }
    }
}

/// A typed audit-log event.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Event {
    /// A principal read a protected record for a purpose.
    ReadPhi {
        principal: String,
        record: String,
        purpose: String,
        event_id: String,
    },
    /// A principal read one attribute of a protected record.
    ReadAttribute {
        principal: String,
        record: String,
        attribute: String,
    },
    /// A patient asked for access to a record.
    RequestAccess {
        patient: String,
        record: String,
        request_id: String,
        request_date: String,
    },
    /// A patient asked for deactivation of their data.
    RequestDeactivation {
        patient: String,
        request_id: String,
        request_date: String,
    },
    /// Deactivation request marked fulfilled.
    DeactivationFulfilled { request_id: String },
    /// Access request marked fulfilled.
    RequestFulfilled { request_id: String },
    /// A breach affecting the listed patients was discovered.
    BreachDiscovered {
        breach_id: String,
        affected_patient_ids: Vec<String>,
        breach_date: String,
    },
    /// A breach notification reached a patient.
    NotificationSent { breach_id: String, patient: String },
    /// A request was processed. Counts as fulfilled only when processed
    /// within [`FULFILLMENT_WINDOW_DAYS`] of the request.
    RequestProcessed {
        kind: RequestKind,
        request_id: String,
        request_date: String,
        processed_date: String,
    },
}

impl Event {
    /// Facts this event contributes to the store.
    ///
    /// # Errors
    ///
    /// Returns `DataQualityError::MalformedDate` when a `RequestProcessed`
    /// event carries a malformed date.
    pub fn facts(&self) -> Result<Vec<Fact>, DataQualityError> {
        use predicates as p;

        let facts = match self {
            Self::ReadPhi {
                principal,
                record,
                purpose,
                event_id,
            } => vec![Fact::new(
                p::READ_PHI,
                [principal, record, purpose, event_id].map(String::as_str),
            )],
            Self::ReadAttribute {
                principal,
                record,
                attribute,
            } => vec![Fact::new(
                p::READ_ATTRIBUTE,
                [principal, record, attribute].map(String::as_str),
            )],
            Self::RequestAccess {
                patient,
                record,
                request_id,
                request_date,
            } => vec![Fact::new(
                p::REQUEST_ACCESS,
                [patient, record, request_id, request_date].map(String::as_str),
            )],
            Self::RequestDeactivation {
                patient,
                request_id,
                request_date,
            } => vec![Fact::new(
                p::REQUEST_DEACTIVATION,
                [patient, request_id, request_date].map(String::as_str),
            )],
            Self::DeactivationFulfilled { request_id } => {
                vec![Fact::new(p::DEACTIVATION_FULFILLED, [request_id.as_str()])]
            }
            Self::RequestFulfilled { request_id } => {
                vec![Fact::new(p::REQUEST_FULFILLED, [request_id.as_str()])]
            }
            Self::BreachDiscovered {
                breach_id,
                affected_patient_ids,
                breach_date,
            } => {
                let mut facts = Vec::with_capacity(affected_patient_ids.len() + 1);
                facts.push(Fact::new(
                    p::BREACH_DISCOVERED,
                    [
                        Value::atom(breach_id.as_str()),
                        Value::atoms(affected_patient_ids.iter().map(String::as_str)),
                        Value::atom(breach_date.as_str()),
                    ],
                ));
                facts.extend(affected_patient_ids.iter().map(|patient| {
                    Fact::new(p::BREACH_AFFECTS, [breach_id.as_str(), patient.as_str()])
                }));
                facts
            }
            Self::NotificationSent { breach_id, patient } => vec![Fact::new(
                p::NOTIFICATION_SENT,
                [breach_id.as_str(), patient.as_str()],
            )],
            Self::RequestProcessed {
                kind,
                request_id,
                request_date,
                processed_date,
            } => {
                if days_since(request_date, processed_date)? <= FULFILLMENT_WINDOW_DAYS {
                    vec![Fact::new(kind.fulfillment_predicate(), [request_id.as_str()])]
                } else {
                    debug!(
                        request_id = %request_id,
                        request_date = %request_date,
                        processed_date = %processed_date,
                        "late processing does not count as fulfillment"
                    );
                    Vec::new()
                }
            }
        };
        Ok(facts)
    }
}

impl FactStore {
    /// Asserts every tuple of a knowledge base. Returns how many facts were new.
    pub fn load_knowledge(&mut self, knowledge: &KnowledgeBase) -> usize {
        let added = self.assert_all(knowledge.iter().flat_map(|(predicate, tuples)| {
            tuples
                .iter()
                .map(move |args| Fact::new(predicate.as_str(), args.iter().cloned()))
        }));
        debug!(
            predicates = knowledge.len(),
            added, "loaded knowledge base"
        );
        added
    }

    /// Asserts the facts of one event. Returns how many facts were new.
    ///
    /// # Errors
    ///
    /// Propagates [`Event::facts`] errors; nothing is asserted in that case.
    pub fn ingest(&mut self, event: &Event) -> Result<usize, DataQualityError> {
        let facts = event.facts()?;
        Ok(self.assert_all(facts))
    }

    /// Asserts the facts of every event, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Propagates the first [`Event::facts`] error. Events before it stay
    /// asserted, since the store is append-only.
    pub fn ingest_all<'a, I>(&mut self, events: I) -> Result<usize, DataQualityError>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let mut added = 0;
        let mut seen = 0usize;
        for event in events {
            added += self.ingest(event)?;
            seen += 1;
        }
        debug!(events = seen, added, "ingested events");
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::Pattern;
    use crate::value::Term;

    #[test]
    fn test_load_knowledge_counts_new_facts() {
        let mut kb = KnowledgeBase::new();
        kb.insert(
            "has_role".to_string(),
            vec![
                vec![Value::atom("doc_1"), Value::atom("doctor")],
                vec![Value::atom("doc_1"), Value::atom("doctor")],
            ],
        );
        kb.insert(
            "is_doctor_of".to_string(),
            vec![vec![Value::atom("doc_1"), Value::atom("pat_1")]],
        );

        let mut store = FactStore::new();
        assert_eq!(store.load_knowledge(&kb), 2);
        assert_eq!(store.load_knowledge(&kb), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_knowledge_base_from_json() {
        let kb: KnowledgeBase = serde_json::from_str(
            r#"{"role_can_access_type": [["doctor", "clinical_note"], ["doctor", "lab_result"]]}"#,
        )
        .unwrap();
        let mut store = FactStore::new();
        store.load_knowledge(&kb);
        assert_eq!(store.predicate_count("role_can_access_type"), 2);
    }

    #[test]
    fn test_read_phi_fact_shape() {
        let facts = Event::ReadPhi {
            principal: "doc_1".to_string(),
            record: "phi_rec_1".to_string(),
            purpose: "diagnosis".to_string(),
            event_id: "log_1".to_string(),
        }
        .facts()
        .unwrap();
        assert_eq!(
            facts,
            vec![Fact::new("read_phi", ["doc_1", "phi_rec_1", "diagnosis", "log_1"])]
        );
    }

    #[test]
    fn test_breach_expands_per_patient() {
        let event = Event::BreachDiscovered {
            breach_id: "br_1".to_string(),
            affected_patient_ids: vec!["pat_1".to_string(), "pat_2".to_string()],
            breach_date: "2025-05-01".to_string(),
        };
        let mut store = FactStore::new();
        assert_eq!(store.ingest(&event).unwrap(), 3);
        assert_eq!(store.predicate_count(predicates::BREACH_AFFECTS), 2);
        let q = Pattern::new(
            predicates::BREACH_DISCOVERED,
            vec![Term::constant("br_1"), Term::var("Ps"), Term::var("T")],
        );
        let hit = store.query(&q).next().unwrap();
        assert_eq!(hit["Ps"], Value::atoms(["pat_1", "pat_2"]));
    }

    #[test]
    fn test_timely_processing_emits_fulfillment() {
        let event = Event::RequestProcessed {
            kind: RequestKind::Access,
            request_id: "req_1".to_string(),
            request_date: "2025-06-01".to_string(),
            processed_date: "2025-07-01".to_string(),
        };
        assert_eq!(
            event.facts().unwrap(),
            vec![Fact::new("request_fulfilled", ["req_1"])]
        );
    }

    #[test]
    fn test_late_processing_emits_nothing() {
        let event = Event::RequestProcessed {
            kind: RequestKind::Deactivation,
            request_id: "req_2".to_string(),
            request_date: "2025-06-01".to_string(),
            processed_date: "2025-07-06".to_string(),
        };
        assert!(event.facts().unwrap().is_empty());
    }

    #[test]
    fn test_processing_with_malformed_date_is_reported() {
        let event = Event::RequestProcessed {
            kind: RequestKind::Access,
            request_id: "req_3".to_string(),
            request_date: "06/01/2025".to_string(),
            processed_date: "2025-07-01".to_string(),
        };
        let mut store = FactStore::new();
        assert!(matches!(
            store.ingest(&event),
            Err(DataQualityError::MalformedDate { .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_event_json_is_tagged_by_action() {
        let event: Event = serde_json::from_str(
            r#"{"action": "request_deactivation", "patient": "pat_15", "request_id": "req_9", "request_date": "2025-06-01"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            Event::RequestDeactivation {
                patient: "pat_15".to_string(),
                request_id: "req_9".to_string(),
                request_date: "2025-06-01".to_string(),
            }
        );
    }
}

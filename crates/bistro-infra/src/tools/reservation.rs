//! The reservation and menu tools.
//!
//! Each tool is one GraphQL document plus an argument schema. Validated
//! arguments are passed through as GraphQL variables, and the tool returns
//! the value of its root field.

use serde_json::{Map, Value};

use bistro_core::tool::registry::{RegistryError, Tool, ToolFailure, ToolRegistry, ToolSpec};
use bistro_types::tool::{ArgFormat, ArgKind, ArgSpec, ToolSchema};

use super::backend::BackendClient;

// ---------------------------------------------------------------------------
// GraphQL documents
// ---------------------------------------------------------------------------

const AVAILABILITY: &str = r#"query Availability($date: String!, $partySize: Int!) {
  availability(date: $date, partySize: $partySize) { times }
}"#;

const CREATE_RESERVATION: &str = r#"mutation CreateReservation($date: String!, $time: String!, $partySize: Int!, $name: String!, $phone: String!, $email: String) {
  createReservation(date: $date, time: $time, partySize: $partySize, contact: {name: $name, phone: $phone, email: $email}) {
    confirmationId status tableNumber
  }
}"#;

const RESERVATION_LOOKUP: &str = r#"query ReservationLookup($confirmationId: ID!) {
  reservationLookup(confirmationId: $confirmationId) {
    confirmationId date time partySize status tableNumber
  }
}"#;

const UPDATE_RESERVATION: &str = r#"mutation UpdateReservation($confirmationId: ID!, $date: String, $time: String, $partySize: Int) {
  updateReservation(confirmationId: $confirmationId, date: $date, time: $time, partySize: $partySize) {
    confirmationId date time partySize status
  }
}"#;

const CANCEL_RESERVATION: &str = r#"mutation CancelReservation($confirmationId: ID!) {
  cancelReservation(confirmationId: $confirmationId) { confirmationId status }
}"#;

const MENU: &str = r#"query Menu($dietary: String) {
  menu(dietary: $dietary) { name description price dietaryTags allergens }
}"#;

// ---------------------------------------------------------------------------
// Tool
// ---------------------------------------------------------------------------

/// One backend operation exposed to the model.
pub struct ReservationTool {
    spec: ToolSpec,
    document: &'static str,
    client: BackendClient,
}

impl ReservationTool {
    pub fn new(spec: ToolSpec, document: &'static str, client: BackendClient) -> Self {
        Self { spec, document, client }
    }
}

impl Tool for ReservationTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolFailure> {
        let mut data = self.client.execute(self.document, &args).await?;
        // The root field carries the tool's name; unwrap it when present.
        Ok(match data.get_mut(self.spec.name.as_str()) {
            Some(field) => field.take(),
            None => data,
        })
    }
}

fn confirmation_id() -> ArgSpec {
    ArgSpec::required("confirmationId", ArgKind::String, "Confirmation code of an existing reservation")
}

fn date(required: bool) -> ArgSpec {
    let description = "Reservation date, YYYY-MM-DD";
    let arg = if required {
        ArgSpec::required("date", ArgKind::String, description)
    } else {
        ArgSpec::optional("date", ArgKind::String, description)
    };
    arg.with_format(ArgFormat::Date)
}

fn time(required: bool) -> ArgSpec {
    let description = "Seating time, 24-hour HH:MM";
    let arg = if required {
        ArgSpec::required("time", ArgKind::String, description)
    } else {
        ArgSpec::optional("time", ArgKind::String, description)
    };
    arg.with_format(ArgFormat::Time)
}

fn party_size(required: bool) -> ArgSpec {
    let description = "Number of guests";
    let arg = if required {
        ArgSpec::required("partySize", ArgKind::Integer, description)
    } else {
        ArgSpec::optional("partySize", ArgKind::Integer, description)
    };
    arg.with_minimum(1.0)
}

/// Specs and documents for the six backend tools.
fn definitions() -> Vec<(ToolSpec, &'static str)> {
    vec![
        (
            ToolSpec::new(
                "availability",
                "List open seating times for a date and party size.",
                ToolSchema::new(vec![date(true), party_size(true)]),
            )
            .with_narration("Checking tables for {partySize} on {date}"),
            AVAILABILITY,
        ),
        (
            ToolSpec::new(
                "createReservation",
                "Book a table. Returns the confirmation id, status and table number.",
                ToolSchema::new(vec![
                    date(true),
                    time(true),
                    party_size(true),
                    ArgSpec::required("name", ArgKind::String, "Guest name for the booking"),
                    ArgSpec::required("phone", ArgKind::String, "Contact phone number"),
                    ArgSpec::optional("email", ArgKind::String, "Contact email").with_format(ArgFormat::Email),
                ]),
            )
            .with_narration("Booking a table for {partySize} on {date} at {time}"),
            CREATE_RESERVATION,
        ),
        (
            ToolSpec::new(
                "reservationLookup",
                "Fetch an existing reservation by confirmation id.",
                ToolSchema::new(vec![confirmation_id()]),
            )
            .with_narration("Looking up reservation {confirmationId}"),
            RESERVATION_LOOKUP,
        ),
        (
            ToolSpec::new(
                "updateReservation",
                "Change the date, time or party size of an existing reservation.",
                ToolSchema::new(vec![confirmation_id(), date(false), time(false), party_size(false)]),
            )
            .with_narration("Updating reservation {confirmationId}"),
            UPDATE_RESERVATION,
        ),
        (
            ToolSpec::new(
                "cancelReservation",
                "Cancel an existing reservation.",
                ToolSchema::new(vec![confirmation_id()]),
            )
            .with_narration("Cancelling reservation {confirmationId}"),
            CANCEL_RESERVATION,
        ),
        (
            ToolSpec::new(
                "menu",
                "List dishes with prices, dietary tags and allergens, optionally filtered by a dietary tag.",
                ToolSchema::new(vec![ArgSpec::optional(
                    "dietary",
                    ArgKind::String,
                    "Dietary tag such as vegan or gluten-free",
                )]),
            )
            .with_narration("Checking the menu"),
            MENU,
        ),
    ]
}

/// Registry holding every backend tool, sharing one client.
pub fn reservation_registry(client: BackendClient) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    for (spec, document) in definitions() {
        registry.register(ReservationTool::new(spec, document, client.clone()))?;
    }
    tracing::debug!(tools = registry.len(), backend = %client.url(), "registered reservation tools");
    Ok(registry)
}

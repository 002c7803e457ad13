//! Transition tokens and the procedures C3 dispatches against them.
//!
//! Procedures are stored already type-erased at registration time, not
//! dispatch time: every callback closes over [`Particle`] and
//! [`UsedData`], which are themselves the crate's tagged-variant
//! stand-ins for a class hierarchy, so there is no further downcasting
//! needed at call sites.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::particle::{ClassTag, Particle};
use crate::witness::WitnessData;

/// The carry value threaded between consecutive transitions to support
/// partial consumption (e.g. spending part of a fungible amount).
/// `Void` means "no carry" — the input or output was fully resolved in
/// a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsedData {
    Void,
    Typed { type_tag: String, payload: Vec<u8> },
}

impl UsedData {
    pub fn typed(type_tag: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::Typed {
            type_tag: type_tag.into(),
            payload,
        }
    }

    pub fn type_tag(&self) -> &str {
        match self {
            UsedData::Void => "Void",
            UsedData::Typed { type_tag, .. } => type_tag,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, UsedData::Void)
    }
}

impl Default for UsedData {
    fn default() -> Self {
        UsedData::Void
    }
}

/// `(InputClass, InputUsedType, OutputClass, OutputUsedType)` — the key
/// a transition procedure is registered and looked up under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransitionToken {
    pub input_class: ClassTag,
    pub input_used_type: String,
    pub output_class: ClassTag,
    pub output_used_type: String,
}

impl TransitionToken {
    pub fn new(
        input_class: ClassTag,
        input_used_type: impl Into<String>,
        output_class: ClassTag,
        output_used_type: impl Into<String>,
    ) -> Self {
        Self {
            input_class,
            input_used_type: input_used_type.into(),
            output_class,
            output_used_type: output_used_type.into(),
        }
    }

    /// The token for a fresh dispatch, before any carry has been
    /// established on either side.
    pub fn void(input_class: ClassTag, output_class: ClassTag) -> Self {
        Self::new(input_class, "Void", output_class, "Void")
    }
}

impl std::fmt::Display for TransitionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}:{} -> {}:{})",
            self.input_class, self.input_used_type, self.output_class, self.output_used_type
        )
    }
}

type Precondition =
    Arc<dyn Fn(&Particle, &UsedData, Option<&Particle>, &UsedData) -> Result<(), String> + Send + Sync>;
type UsedCompute =
    Arc<dyn Fn(&Particle, &UsedData, Option<&Particle>, &UsedData) -> Option<UsedData> + Send + Sync>;
type InputWitnessValidator = Arc<dyn Fn(&Particle, &dyn WitnessData) -> Result<(), String> + Send + Sync>;
type OutputWitnessValidator = Arc<dyn Fn(Option<&Particle>, &dyn WitnessData) -> Result<(), String> + Send + Sync>;

/// The four callbacks bound to a [`TransitionToken`]: a precondition,
/// an input-used-carry compute, an output-used-carry compute, and the
/// witness validators for each side.
///
/// `output` is `None` when the dispatch cursor could not find a
/// producing instruction to pair with a trailing consuming one — a
/// "burn": the input is destroyed and nothing takes its place. A
/// scrypt that wants to allow this registers a procedure under the
/// token `(class, used_type, VOID_CLASS, "Void")` (see
/// [`crate::machine::VOID_CLASS`]); everyone else simply never gets
/// dispatched that way, which surfaces as [`crate::error::CMErrorKind::MissingProcedure`].
#[derive(Clone)]
pub struct TransitionProcedure {
    precondition: Precondition,
    input_used_compute: UsedCompute,
    output_used_compute: UsedCompute,
    input_witness_validator: InputWitnessValidator,
    output_witness_validator: OutputWitnessValidator,
}

impl TransitionProcedure {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        precondition: impl Fn(&Particle, &UsedData, Option<&Particle>, &UsedData) -> Result<(), String>
            + Send
            + Sync
            + 'static,
        input_used_compute: impl Fn(&Particle, &UsedData, Option<&Particle>, &UsedData) -> Option<UsedData>
            + Send
            + Sync
            + 'static,
        output_used_compute: impl Fn(&Particle, &UsedData, Option<&Particle>, &UsedData) -> Option<UsedData>
            + Send
            + Sync
            + 'static,
        input_witness_validator: impl Fn(&Particle, &dyn WitnessData) -> Result<(), String> + Send + Sync + 'static,
        output_witness_validator: impl Fn(Option<&Particle>, &dyn WitnessData) -> Result<(), String>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            precondition: Arc::new(precondition),
            input_used_compute: Arc::new(input_used_compute),
            output_used_compute: Arc::new(output_used_compute),
            input_witness_validator: Arc::new(input_witness_validator),
            output_witness_validator: Arc::new(output_witness_validator),
        }
    }

    pub fn check_precondition(
        &self,
        input: &Particle,
        in_used: &UsedData,
        output: Option<&Particle>,
        out_used: &UsedData,
    ) -> Result<(), String> {
        (self.precondition)(input, in_used, output, out_used)
    }

    pub fn compute_input_used(
        &self,
        input: &Particle,
        in_used: &UsedData,
        output: Option<&Particle>,
        out_used: &UsedData,
    ) -> Option<UsedData> {
        (self.input_used_compute)(input, in_used, output, out_used)
    }

    pub fn compute_output_used(
        &self,
        input: &Particle,
        in_used: &UsedData,
        output: Option<&Particle>,
        out_used: &UsedData,
    ) -> Option<UsedData> {
        (self.output_used_compute)(input, in_used, output, out_used)
    }

    pub fn validate_input_witness(&self, input: &Particle, witnesses: &dyn WitnessData) -> Result<(), String> {
        (self.input_witness_validator)(input, witnesses)
    }

    pub fn validate_output_witness(&self, output: Option<&Particle>, witnesses: &dyn WitnessData) -> Result<(), String> {
        (self.output_witness_validator)(output, witnesses)
    }

    /// A procedure with a trivially-true precondition, no used-data
    /// carry on either side, and witness validators supplied
    /// independently. Used by `create_transition_from_rri` and by tests
    /// wiring up a minimal one-shot transition.
    pub fn one_shot(
        input_witness_validator: impl Fn(&Particle, &dyn WitnessData) -> Result<(), String> + Send + Sync + 'static,
        output_witness_validator: impl Fn(Option<&Particle>, &dyn WitnessData) -> Result<(), String>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::new(
            |_, _, _, _| Ok(()),
            |_, _, _, _| None,
            |_, _, _, _| None,
            input_witness_validator,
            output_witness_validator,
        )
    }
}

impl std::fmt::Debug for TransitionProcedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TransitionProcedure { .. }")
    }
}

//! C3 — the constraint machine: atom lowering, spin evolution,
//! transition dispatch, and the `Building -> Built` builder lifecycle.

use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::atom::{to_micro_instructions, Atom, MicroInstruction};
use crate::error::{BuildError, CMError, CMErrorKind, DataPointer};
use crate::particle::{ClassTag, Particle, ParticleDefinition};
use crate::spin::Spin;
use crate::store::{EngineStore, StateTransformer};
use crate::transition::{TransitionProcedure, TransitionToken, UsedData};
use crate::witness::WitnessData;

/// Sentinel output class a standalone consuming `DOWN` dispatches
/// against when no producing `UP` follows it in the atom (a "burn").
/// Symmetric with a standalone `UP` needing no procedure at all (a free
/// mint) — see DESIGN.md for the reasoning behind this asymmetry.
pub const VOID_CLASS: &str = "Void";

type KernelProcedure = Arc<dyn Fn(&Atom) -> Result<(), String> + Send + Sync>;
type ComputeFn = Arc<dyn Fn(&Atom) -> serde_json::Value + Send + Sync>;

/// Marker for a machine still accepting registrations.
pub struct Building;
/// Marker for a frozen, shareable, `validate`-able machine.
pub struct Built;

/// The compiled dispatch table plus registry, parameterized by
/// lifecycle state. Only `ConstraintMachine<Building>` exposes
/// mutation; only `ConstraintMachine<Built>` exposes `validate`. There
/// is no interior mutability once built — a `Built` machine is `Sync`
/// and safe to share across validation threads without synchronization
/// of its own.
pub struct ConstraintMachine<S> {
    particle_definitions: BTreeMap<ClassTag, ParticleDefinition>,
    procedures: BTreeMap<TransitionToken, TransitionProcedure>,
    kernel_procedures: Vec<(&'static str, KernelProcedure)>,
    computes: BTreeMap<String, ComputeFn>,
    state_transformers: Vec<StateTransformer>,
    _state: PhantomData<S>,
}

impl Default for ConstraintMachine<Building> {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstraintMachine<Building> {
    pub fn new() -> Self {
        Self {
            particle_definitions: BTreeMap::new(),
            procedures: BTreeMap::new(),
            kernel_procedures: Vec::new(),
            computes: BTreeMap::new(),
            state_transformers: vec![StateTransformer::rri_zero_nonce()],
            _state: PhantomData,
        }
    }

    pub fn add_particle_definition(&mut self, definition: ParticleDefinition) -> Result<(), BuildError> {
        if self.particle_definitions.contains_key(&definition.class) {
            return Err(BuildError::DuplicateDefinition(definition.class.to_string()));
        }
        self.particle_definitions.insert(definition.class.clone(), definition);
        Ok(())
    }

    pub fn add_procedure(&mut self, token: TransitionToken, procedure: TransitionProcedure) -> Result<(), BuildError> {
        if self.procedures.contains_key(&token) {
            return Err(BuildError::DuplicateTransition(token.to_string()));
        }
        self.procedures.insert(token, procedure);
        Ok(())
    }

    pub fn add_kernel_procedure(
        &mut self,
        name: &'static str,
        check: impl Fn(&Atom) -> Result<(), String> + Send + Sync + 'static,
    ) {
        self.kernel_procedures.push((name, Arc::new(check)));
    }

    pub fn add_compute(&mut self, key: impl Into<String>, compute: impl Fn(&Atom) -> serde_json::Value + Send + Sync + 'static) {
        self.computes.insert(key.into(), Arc::new(compute));
    }

    /// Registers a state transformer innermost of whatever is already
    /// registered (closest to the base store); the builder seeds the
    /// stack with the RRI-zero-nonce transformer, so anything added
    /// here is checked first.
    pub fn add_state_transformer(&mut self, transformer: StateTransformer) {
        self.state_transformers.insert(0, transformer);
    }

    pub fn build(self) -> ConstraintMachine<Built> {
        ConstraintMachine {
            particle_definitions: self.particle_definitions,
            procedures: self.procedures,
            kernel_procedures: self.kernel_procedures,
            computes: self.computes,
            state_transformers: self.state_transformers,
            _state: PhantomData,
        }
    }
}

/// The computed auxiliary outputs of a successful validation — pure,
/// derived summaries registered via `add_compute`. The engine store is
/// never mutated here; persisting is the caller's decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplicationResult {
    pub computed: BTreeMap<String, serde_json::Value>,
}

struct PendingParticle {
    particle: Particle,
    used: UsedData,
    pointer: DataPointer,
}

impl ConstraintMachine<Built> {
    /// Runs the full validation pipeline against a read view of
    /// `store`: kernel checks, lowering, static checks, spin evolution,
    /// then dispatch, in that order, aborting on the first error except
    /// for kernel checks (batched). Pure function of `(atom, store
    /// snapshot, self)`; the store is never written to.
    pub fn validate(&self, atom: &Atom, store: &dyn EngineStore) -> Result<ApplicationResult, CMError> {
        debug!(groups = atom.groups().len(), "validating atom");
        self.run_kernel_checks(atom)?;

        let instructions = to_micro_instructions(atom)?;

        self.run_static_checks(&instructions)?;

        let virtualized = VirtualizedStoreView::new(store, &self.state_transformers);
        self.run_spin_evolution(&instructions, &virtualized)?;

        let pushes: Vec<(Particle, Spin, DataPointer)> = instructions
            .into_iter()
            .filter_map(|instruction| match instruction {
                MicroInstruction::Push { particle, spin, pointer } => Some((particle, spin, pointer)),
                MicroInstruction::GroupEnd => None,
            })
            .collect();

        self.run_dispatch(&pushes, &atom.witnesses)?;

        let computed = self
            .computes
            .iter()
            .map(|(key, compute)| (key.clone(), compute(atom)))
            .collect();

        debug!("atom accepted");
        Ok(ApplicationResult { computed })
    }

    fn run_kernel_checks(&self, atom: &Atom) -> Result<(), CMError> {
        let failures: Vec<String> = self
            .kernel_procedures
            .iter()
            .filter_map(|(name, check)| check(atom).err().map(|msg| format!("{name}: {msg}")))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            warn!(count = failures.len(), "kernel checks rejected atom");
            Err(CMError::kernel(failures))
        }
    }

    fn run_static_checks(&self, instructions: &[MicroInstruction]) -> Result<(), CMError> {
        for instruction in instructions {
            let MicroInstruction::Push { particle, pointer, .. } = instruction else {
                continue;
            };
            let definition = self.resolve(&particle.class, *pointer)?;

            let declared = &particle.destinations;
            let computed = definition.destinations_for(particle);
            if declared.is_empty() || *declared != computed {
                return Err(CMError::at(
                    CMErrorKind::StaticCheckFailed("declared destinations do not match the shard mapper".into()),
                    *pointer,
                ));
            }

            definition
                .run_static_check(particle)
                .map_err(|msg| CMError::at(CMErrorKind::StaticCheckFailed(msg), *pointer))?;
        }
        Ok(())
    }

    /// Checks each PUSH's target spin against the *current* spin — the
    /// store's (virtualized) answer for a particle's first appearance
    /// in this atom, or the target of its previous PUSH within the
    /// same atom thereafter. The store itself is never consulted twice
    /// for the same particle: `validate` never mutates it, so
    /// re-querying it for a second PUSH would see the same pre-atom
    /// spin and reject every legitimately-evolving particle.
    fn run_spin_evolution(&self, instructions: &[MicroInstruction], store: &VirtualizedStoreView<'_>) -> Result<(), CMError> {
        let mut in_atom: HashMap<Particle, Spin> = HashMap::new();
        for instruction in instructions {
            let MicroInstruction::Push { particle, spin, pointer } = instruction else {
                continue;
            };
            let current = match in_atom.get(particle) {
                Some(spin) => *spin,
                None => store.get_spin(particle),
            };
            if current.can_advance_to(*spin) {
                in_atom.insert(particle.clone(), *spin);
                continue;
            }
            if *spin == Spin::Down && current == Spin::Neutral {
                return Err(CMError::at(
                    CMErrorKind::MissingDependency(format!("{} is not UP in the store", particle.class)),
                    *pointer,
                ));
            }
            return Err(CMError::at(
                CMErrorKind::SpinConflict {
                    current,
                    requested: *spin,
                },
                *pointer,
            ));
        }
        Ok(())
    }

    fn run_dispatch(&self, pushes: &[(Particle, Spin, DataPointer)], witnesses: &dyn WitnessData) -> Result<(), CMError> {
        let n = pushes.len();
        let mut i = 0usize;
        let mut carried_input: Option<PendingParticle> = None;
        let mut carried_output: Option<PendingParticle> = None;
        let max_rounds = n.saturating_mul(2) + 4;
        let mut rounds = 0usize;

        loop {
            rounds += 1;
            if rounds > max_rounds {
                return Err(CMError::at(
                    CMErrorKind::UsedDataConflict("used-data carry never resolved within the atom".into()),
                    pushes.last().map(|(_, _, p)| *p).unwrap_or(DataPointer::new(0, 0)),
                ));
            }

            let input = match carried_input.take() {
                Some(pending) => Some(pending),
                None if i < n && pushes[i].1 == Spin::Down => {
                    let (particle, _, pointer) = pushes[i].clone();
                    i += 1;
                    Some(PendingParticle {
                        particle,
                        used: UsedData::Void,
                        pointer,
                    })
                }
                None => None,
            };

            let Some(input) = input else {
                if i < n {
                    // Only an UP can remain here; it needs no procedure.
                    i += 1;
                    continue;
                }
                if carried_output.is_some() {
                    return Err(CMError::at(
                        CMErrorKind::UsedDataConflict("unresolved output carry at end of atom".into()),
                        pushes.last().map(|(_, _, p)| *p).unwrap_or(DataPointer::new(0, 0)),
                    ));
                }
                break;
            };

            let output = match carried_output.take() {
                Some(pending) => Some(pending),
                None if i < n && pushes[i].1 == Spin::Up => {
                    let (particle, _, pointer) = pushes[i].clone();
                    i += 1;
                    Some(PendingParticle {
                        particle,
                        used: UsedData::Void,
                        pointer,
                    })
                }
                None => None,
            };

            let (new_in_used, new_out_used) = self.dispatch_one(&input, &output, witnesses)?;

            match (new_in_used, new_out_used) {
                (Some(_), Some(_)) => {
                    return Err(CMError::at(
                        CMErrorKind::UsedDataConflict(
                            "both input_used_compute and output_used_compute returned Some".into(),
                        ),
                        input.pointer,
                    ))
                }
                (Some(used), None) => {
                    carried_input = Some(PendingParticle {
                        particle: input.particle,
                        used,
                        pointer: input.pointer,
                    });
                }
                (None, Some(used)) => match output {
                    Some(output) => {
                        carried_output = Some(PendingParticle {
                            particle: output.particle,
                            used,
                            pointer: output.pointer,
                        });
                    }
                    None => {
                        return Err(CMError::at(
                            CMErrorKind::UsedDataConflict(
                                "output_used_compute returned a carry with no output particle".into(),
                            ),
                            input.pointer,
                        ))
                    }
                },
                (None, None) => {}
            }
        }

        if i < n {
            return Err(CMError::at(CMErrorKind::UnbalancedGroup, pushes[i].2));
        }
        Ok(())
    }

    fn dispatch_one(
        &self,
        input: &PendingParticle,
        output: &Option<PendingParticle>,
        witnesses: &dyn WitnessData,
    ) -> Result<(Option<UsedData>, Option<UsedData>), CMError> {
        let output_class = output
            .as_ref()
            .map(|o| o.particle.class.clone())
            .unwrap_or_else(|| ClassTag::new(VOID_CLASS));
        let output_used_type = output.as_ref().map(|o| o.used.type_tag().to_string()).unwrap_or_else(|| "Void".into());

        let token = TransitionToken::new(
            input.particle.class.clone(),
            input.used.type_tag().to_string(),
            output_class,
            output_used_type,
        );

        let procedure = self
            .procedures
            .get(&token)
            .ok_or_else(|| CMError::at(CMErrorKind::MissingProcedure(token.to_string()), input.pointer))?;

        let output_particle = output.as_ref().map(|o| &o.particle);
        let out_used = output.as_ref().map(|o| &o.used).cloned().unwrap_or(UsedData::Void);

        procedure
            .check_precondition(&input.particle, &input.used, output_particle, &out_used)
            .map_err(|msg| CMError::at(CMErrorKind::PreconditionFailed(msg), input.pointer))?;

        // The null-check and RRI-equality rule only apply to a coupled
        // transition (both an input and an output present); a standalone
        // burn never has a second side to compare against. Each side's
        // null-check fires independently of whether the *other* side's
        // definition declares an `rri_mapper` at all.
        if let Some(output_particle) = output_particle {
            let output_pointer = output.as_ref().map(|o| o.pointer).unwrap_or(input.pointer);
            let in_def = self.particle_definitions.get(&input.particle.class);
            let out_def = self.particle_definitions.get(&output_particle.class);

            let in_rri = match in_def {
                Some(in_def) if in_def.has_rri_mapper() => Some(in_def.rri_for(&input.particle).ok_or_else(|| {
                    CMError::at(CMErrorKind::PreconditionFailed("rri cannot be null".into()), input.pointer)
                })?),
                _ => None,
            };
            let out_rri = match out_def {
                Some(out_def) if out_def.has_rri_mapper() => Some(out_def.rri_for(output_particle).ok_or_else(|| {
                    CMError::at(CMErrorKind::PreconditionFailed("rri cannot be null".into()), output_pointer)
                })?),
                _ => None,
            };

            if let (Some(in_rri), Some(out_rri)) = (in_rri, out_rri) {
                if in_rri != out_rri {
                    return Err(CMError::at(CMErrorKind::RriMismatch, input.pointer));
                }
            }
        }

        let new_in_used = procedure.compute_input_used(&input.particle, &input.used, output_particle, &out_used);
        let new_out_used = procedure.compute_output_used(&input.particle, &input.used, output_particle, &out_used);

        procedure
            .validate_input_witness(&input.particle, witnesses)
            .map_err(|msg| CMError::at(CMErrorKind::WitnessFailure(msg), input.pointer))?;
        procedure
            .validate_output_witness(output_particle, witnesses)
            .map_err(|msg| {
                CMError::at(
                    CMErrorKind::WitnessFailure(msg),
                    output.as_ref().map(|o| o.pointer).unwrap_or(input.pointer),
                )
            })?;

        Ok((new_in_used, new_out_used))
    }

    fn resolve(&self, class: &ClassTag, pointer: DataPointer) -> Result<&ParticleDefinition, CMError> {
        self.particle_definitions
            .get(class)
            .ok_or_else(|| CMError::at(CMErrorKind::UnknownParticle(class.to_string()), pointer))
    }
}

impl Clone for PendingParticle {
    fn clone(&self) -> Self {
        Self {
            particle: self.particle.clone(),
            used: self.used.clone(),
            pointer: self.pointer,
        }
    }
}

/// Thin read-only view composing the base store with the machine's
/// registered state transformers, scoped to the lifetime of one
/// `validate` call. Reimplements [`VirtualizedStore`]'s read rule
/// directly against borrowed transformers rather than owning a copy of
/// them, since [`StateTransformer`] closes over a boxed predicate and
/// is not `Clone`.
struct VirtualizedStoreView<'a> {
    base: &'a dyn EngineStore,
    transformers: &'a [StateTransformer],
}

impl<'a> VirtualizedStoreView<'a> {
    fn new(base: &'a dyn EngineStore, transformers: &'a [StateTransformer]) -> Self {
        Self { base, transformers }
    }

    fn get_spin(&self, particle: &Particle) -> Spin {
        let base_spin = self.base.get_spin(particle);
        if base_spin != Spin::Neutral {
            return base_spin;
        }
        for transformer in self.transformers {
            if let Some(spin) = transformer.evaluate(particle) {
                trace!(transformer = transformer.name(), "spin virtualized");
                return spin;
            }
        }
        Spin::Neutral
    }
}

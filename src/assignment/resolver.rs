//! Availability and ownership of responsibility units
//!
//! [`AssignmentIndex`] keeps the active invites of one passport keyed by the
//! units they cover. [`AssignmentResolver`] answers questions against an index
//! and the passport's [`ContentSchema`]:
//!
//! - who owns a unit for contribution (explicit field grant first, then a
//!   block grant on the containing block)
//! - whether a unit can still be assigned in a given mode
//! - who reviews a unit
//!
//! Block grants cover fields by membership, so instances created after the
//! grant are covered too.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::invite::Invite;
use crate::models::{PartnerRole, ResponsibilityMode, ResponsibilityUnit};
use crate::schema::{Block, ContentSchema};

/// Resolution policy knobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverPolicy {
    /// Treat an active review of a unit as blocking a new contribution to it
    pub review_blocks_contribution: bool,
}

impl ResolverPolicy {
    pub fn review_blocks_contribution(mut self, value: bool) -> Self {
        self.review_blocks_contribution = value;
        self
    }
}

/// Active invites of a passport, indexed by covered unit
#[derive(Debug, Clone, Default)]
pub struct AssignmentIndex {
    invites: HashMap<Uuid, Invite>,
    /// field_id -> instance_id -> contribute owner
    field_owners: HashMap<String, BTreeMap<String, Uuid>>,
    /// block_id -> contribute owner
    block_owners: HashMap<String, Uuid>,
    /// field_id -> instance_id -> reviewers
    field_reviewers: HashMap<String, BTreeMap<String, Vec<Uuid>>>,
    /// block_id -> reviewers
    block_reviewers: HashMap<String, Vec<Uuid>>,
}

impl AssignmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a passport's invites; inactive ones are skipped
    pub fn from_invites(invites: impl IntoIterator<Item = Invite>) -> Self {
        let mut index = Self::new();
        for invite in invites {
            index.insert(invite);
        }
        index
    }

    /// Add an invite. Inactive invites are ignored; an already indexed
    /// contribute owner is kept.
    pub fn insert(&mut self, invite: Invite) {
        if !invite.is_active() {
            return;
        }
        let id = invite.id;
        // Block coverage only counts when the grant is not refined to fields
        let refined = invite.units.iter().any(|u| !u.is_block());

        for unit in &invite.units {
            match (unit, invite.mode) {
                (ResponsibilityUnit::Block { block_id }, ResponsibilityMode::Contribute) => {
                    if !refined {
                        self.block_owners.entry(block_id.clone()).or_insert(id);
                    }
                }
                (ResponsibilityUnit::Block { block_id }, ResponsibilityMode::Review) => {
                    if !refined {
                        push_unique(self.block_reviewers.entry(block_id.clone()).or_default(), id);
                    }
                }
                (
                    ResponsibilityUnit::Field {
                        field_id,
                        instance_id,
                    },
                    ResponsibilityMode::Contribute,
                ) => {
                    self.field_owners
                        .entry(field_id.clone())
                        .or_default()
                        .entry(instance_id.clone())
                        .or_insert(id);
                }
                (
                    ResponsibilityUnit::Field {
                        field_id,
                        instance_id,
                    },
                    ResponsibilityMode::Review,
                ) => {
                    let reviewers = self
                        .field_reviewers
                        .entry(field_id.clone())
                        .or_default()
                        .entry(instance_id.clone())
                        .or_default();
                    push_unique(reviewers, id);
                }
            }
        }

        self.invites.insert(id, invite);
    }

    /// Drop an invite and every unit it covered
    pub fn remove(&mut self, invite_id: Uuid) -> Option<Invite> {
        let invite = self.invites.remove(&invite_id)?;

        self.block_owners.retain(|_, owner| *owner != invite_id);
        for instances in self.field_owners.values_mut() {
            instances.retain(|_, owner| *owner != invite_id);
        }
        self.field_owners.retain(|_, instances| !instances.is_empty());

        for reviewers in self.block_reviewers.values_mut() {
            reviewers.retain(|id| *id != invite_id);
        }
        self.block_reviewers.retain(|_, reviewers| !reviewers.is_empty());
        for instances in self.field_reviewers.values_mut() {
            for reviewers in instances.values_mut() {
                reviewers.retain(|id| *id != invite_id);
            }
            instances.retain(|_, reviewers| !reviewers.is_empty());
        }
        self.field_reviewers.retain(|_, instances| !instances.is_empty());

        Some(invite)
    }

    pub fn get(&self, invite_id: Uuid) -> Option<&Invite> {
        self.invites.get(&invite_id)
    }

    pub fn len(&self) -> usize {
        self.invites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invites.is_empty()
    }

    /// Indexed invites, oldest first
    pub fn invites(&self) -> Vec<&Invite> {
        let mut invites: Vec<&Invite> = self.invites.values().collect();
        invites.sort_by_key(|i| i.created_at);
        invites
    }

    fn field_owner(&self, field_id: &str, instance_id: &str) -> Option<&Invite> {
        self.field_owners
            .get(field_id)
            .and_then(|instances| instances.get(instance_id))
            .and_then(|id| self.invites.get(id))
    }

    fn block_owner(&self, block_id: &str) -> Option<&Invite> {
        self.block_owners
            .get(block_id)
            .and_then(|id| self.invites.get(id))
    }

    /// Explicitly owned instances of a field, in instance order
    fn owned_instances(&self, field_id: &str) -> impl Iterator<Item = (&String, &Invite)> + '_ {
        self.field_owners
            .get(field_id)
            .into_iter()
            .flat_map(|instances| instances.iter())
            .filter_map(|(instance, id)| self.invites.get(id).map(|invite| (instance, invite)))
    }

    fn reviewer_ids_of_field(&self, field_id: &str, instance_id: &str) -> &[Uuid] {
        self.field_reviewers
            .get(field_id)
            .and_then(|instances| instances.get(instance_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn reviewer_ids_of_block(&self, block_id: &str) -> &[Uuid] {
        self.block_reviewers
            .get(block_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Reviewed instances of a field, in instance order
    fn reviewed_instances(&self, field_id: &str) -> impl Iterator<Item = (&String, &[Uuid])> + '_ {
        self.field_reviewers
            .get(field_id)
            .into_iter()
            .flat_map(|instances| instances.iter())
            .map(|(instance, ids)| (instance, ids.as_slice()))
    }
}

fn push_unique(ids: &mut Vec<Uuid>, id: Uuid) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

/// Who holds a unit, as shown to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holder {
    pub invite_id: Uuid,
    pub email: String,
    pub role: PartnerRole,
}

impl From<&Invite> for Holder {
    fn from(invite: &Invite) -> Self {
        Self {
            invite_id: invite.id,
            email: invite.email.clone(),
            role: invite.role,
        }
    }
}

/// Availability of one selectable unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitStatus {
    pub unit: ResponsibilityUnit,
    pub block_id: String,
    pub label: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Holder>,
    pub reviewers: Vec<Holder>,
}

/// Read-only resolution over a schema and an index
#[derive(Clone, Copy)]
pub struct AssignmentResolver<'a> {
    schema: &'a ContentSchema,
    index: &'a AssignmentIndex,
    policy: ResolverPolicy,
}

impl<'a> AssignmentResolver<'a> {
    pub fn new(schema: &'a ContentSchema, index: &'a AssignmentIndex, policy: ResolverPolicy) -> Self {
        Self {
            schema,
            index,
            policy,
        }
    }

    pub fn policy(&self) -> ResolverPolicy {
        self.policy
    }

    /// The contribute owner of a unit. The mode does not change the answer:
    /// ownership is always about contribution.
    pub fn resolve_owner(
        &self,
        unit: &ResponsibilityUnit,
        _mode: ResponsibilityMode,
    ) -> Option<&'a Invite> {
        self.owner_of(unit)
    }

    fn owner_of(&self, unit: &ResponsibilityUnit) -> Option<&'a Invite> {
        let index = self.index;
        match unit {
            ResponsibilityUnit::Field {
                field_id,
                instance_id,
            } => index.field_owner(field_id, instance_id).or_else(|| {
                self.schema
                    .block_of_field(field_id)
                    .and_then(|block| index.block_owner(&block.id))
            }),
            ResponsibilityUnit::Block { block_id } => {
                index.block_owner(block_id).or_else(|| {
                    let block = self.schema.block(block_id)?;
                    block
                        .fields
                        .iter()
                        .find_map(|field| index.owned_instances(&field.id).next())
                        .map(|(_, invite)| invite)
                })
            }
        }
    }

    /// Whether a unit can be assigned in `mode`. Review never blocks.
    pub fn is_available(&self, unit: &ResponsibilityUnit, mode: ResponsibilityMode) -> bool {
        match mode {
            ResponsibilityMode::Review => true,
            ResponsibilityMode::Contribute => {
                if self.owner_of(unit).is_some() {
                    return false;
                }
                !(self.policy.review_blocks_contribution && self.has_reviewers(unit))
            }
        }
    }

    /// Whether any delegable unit of the schema is still available in `mode`
    pub fn has_any_available_unit(&self, mode: ResponsibilityMode) -> bool {
        self.schema
            .delegable_blocks()
            .any(|block| self.block_has_available_unit(block, mode))
    }

    /// Like [`Self::has_any_available_unit`], limited to blocks open to `role`
    pub fn has_any_available_unit_for(&self, role: PartnerRole, mode: ResponsibilityMode) -> bool {
        self.schema
            .delegable_blocks()
            .filter(|block| block.allows_role(role))
            .any(|block| self.block_has_available_unit(block, mode))
    }

    fn block_has_available_unit(&self, block: &Block, mode: ResponsibilityMode) -> bool {
        if self.is_available(&ResponsibilityUnit::block(block.id.clone()), mode) {
            return true;
        }
        block
            .fields
            .iter()
            .flat_map(|field| field.units())
            .any(|unit| self.is_available(&unit, mode))
    }

    /// Active review invites touching a unit
    pub fn reviewers_of(&self, unit: &ResponsibilityUnit) -> Vec<&'a Invite> {
        let index = self.index;
        let mut ids: Vec<Uuid> = Vec::new();
        match unit {
            ResponsibilityUnit::Field {
                field_id,
                instance_id,
            } => {
                ids.extend_from_slice(index.reviewer_ids_of_field(field_id, instance_id));
                if let Some(block) = self.schema.block_of_field(field_id) {
                    ids.extend_from_slice(index.reviewer_ids_of_block(&block.id));
                }
            }
            ResponsibilityUnit::Block { block_id } => {
                ids.extend_from_slice(index.reviewer_ids_of_block(block_id));
                if let Some(block) = self.schema.block(block_id) {
                    for field in &block.fields {
                        for (_, reviewers) in index.reviewed_instances(&field.id) {
                            ids.extend_from_slice(reviewers);
                        }
                    }
                }
            }
        }

        let mut seen = Vec::with_capacity(ids.len());
        for id in ids {
            push_unique(&mut seen, id);
        }
        seen.into_iter().filter_map(|id| index.get(id)).collect()
    }

    fn has_reviewers(&self, unit: &ResponsibilityUnit) -> bool {
        !self.reviewers_of(unit).is_empty()
    }

    /// Units that make `unit` unavailable in `mode`. A block reports the
    /// owned instances inside it unless the whole block is owned.
    pub fn conflicts(
        &self,
        unit: &ResponsibilityUnit,
        mode: ResponsibilityMode,
    ) -> Vec<ResponsibilityUnit> {
        if mode == ResponsibilityMode::Review {
            return Vec::new();
        }
        let index = self.index;
        let review_blocks = self.policy.review_blocks_contribution;

        match unit {
            ResponsibilityUnit::Field { .. } => {
                if self.is_available(unit, mode) {
                    Vec::new()
                } else {
                    vec![unit.clone()]
                }
            }
            ResponsibilityUnit::Block { block_id } => {
                if index.block_owner(block_id).is_some()
                    || (review_blocks && !index.reviewer_ids_of_block(block_id).is_empty())
                {
                    return vec![unit.clone()];
                }
                let Some(block) = self.schema.block(block_id) else {
                    return Vec::new();
                };

                let mut taken = Vec::new();
                for field in &block.fields {
                    for (instance, _) in index.owned_instances(&field.id) {
                        taken.push(ResponsibilityUnit::field(field.id.clone(), instance.clone()));
                    }
                    if review_blocks {
                        for (instance, _) in index.reviewed_instances(&field.id) {
                            let reviewed =
                                ResponsibilityUnit::field(field.id.clone(), instance.clone());
                            if !taken.contains(&reviewed) {
                                taken.push(reviewed);
                            }
                        }
                    }
                }
                taken
            }
        }
    }

    /// Union of [`Self::conflicts`] over a selection, without duplicates
    pub fn unavailable_units(
        &self,
        units: &[ResponsibilityUnit],
        mode: ResponsibilityMode,
    ) -> Vec<ResponsibilityUnit> {
        let mut taken: Vec<ResponsibilityUnit> = Vec::new();
        for unit in units {
            for conflict in self.conflicts(unit, mode) {
                if !taken.contains(&conflict) {
                    taken.push(conflict);
                }
            }
        }
        taken
    }

    /// Every selectable unit (blocks and their field instances) with its
    /// availability, limited to blocks open to `role` when given
    pub fn unit_statuses(
        &self,
        role: Option<PartnerRole>,
        mode: ResponsibilityMode,
    ) -> Vec<UnitStatus> {
        let mut statuses = Vec::new();
        for block in self.schema.delegable_blocks() {
            if let Some(role) = role {
                if !block.allows_role(role) {
                    continue;
                }
            }

            let block_unit = ResponsibilityUnit::block(block.id.clone());
            statuses.push(self.status(block_unit, &block.id, block.id.clone(), mode));

            for field in &block.fields {
                let instance_ids = field.instance_ids();
                for (position, instance_id) in instance_ids.iter().enumerate() {
                    let label = if field.repeatable {
                        format!("{} {}", field.label, position + 1)
                    } else {
                        field.label.clone()
                    };
                    let unit = ResponsibilityUnit::field(field.id.clone(), instance_id.clone());
                    statuses.push(self.status(unit, &block.id, label, mode));
                }
            }
        }
        statuses
    }

    fn status(
        &self,
        unit: ResponsibilityUnit,
        block_id: &str,
        label: String,
        mode: ResponsibilityMode,
    ) -> UnitStatus {
        UnitStatus {
            available: self.is_available(&unit, mode),
            owner: self.owner_of(&unit).map(Holder::from),
            reviewers: self
                .reviewers_of(&unit)
                .into_iter()
                .map(Holder::from)
                .collect(),
            block_id: block_id.to_string(),
            label,
            unit,
        }
    }
}

/// A schema and index taken together at one point in time
#[derive(Debug, Clone)]
pub struct AssignmentSnapshot {
    pub schema: ContentSchema,
    pub index: AssignmentIndex,
    pub policy: ResolverPolicy,
}

impl AssignmentSnapshot {
    pub fn new(schema: ContentSchema, index: AssignmentIndex, policy: ResolverPolicy) -> Self {
        Self {
            schema,
            index,
            policy,
        }
    }

    pub fn resolver(&self) -> AssignmentResolver<'_> {
        AssignmentResolver::new(&self.schema, &self.index, self.policy)
    }
}

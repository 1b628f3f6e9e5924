//! Service layer API for kasbon and slot-exception workflows
//!
//! Records are stored as CBOR in sled trees. Every mutation runs under one
//! write lock, so two callers racing on the same step are applied in turn and
//! the second sees the advanced state. Audit entries are appended after the
//! state change commits; an audit failure is logged and never undoes it.
use super::activity::{
    self, ActivityEntry, ActivityLog, ActivitySink, ActivityType, SledActivityLog,
};
use super::approval::ApprovalPath;
use super::builder::{PathRules, build_approval_path};
use super::config::KasbonConfig;
use super::error::KasbonError;
use super::kasbon::{KasbonDraft, KasbonItem, KasbonRequest, KasbonStatus};
use super::lifecycle::{self, Routing, Submission};
use super::matrix::{CoverageIssue, MatrixConfig, MatrixSet};
use super::policy::{DepartmentPolicies, DeptSetting};
use super::resolver::{ApproverResolver, OrgChartResolver, RequesterContext};
use super::slot_request::{SlotRequest, SlotStatus, open_slot_request, validate_slot_layers};
use super::slots::{self, SlotAssessment};
use super::types::Amount;
use super::utils::{KASBON_HRP, SLOT_HRP, new_uuid_to_bech32};
use anyhow::Context;
use sled::Transactional;
use sled::transaction::ConflictableTransactionError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

const KASBON_TREE: &str = "kasbon";
const SLOT_REQUEST_TREE: &str = "slot_requests";
const SETTINGS_TREE: &str = "settings";
const ACTIVITY_TREE: &str = "activity";

const MATRIX_KEY: &str = "matrix";
const DEPARTMENTS_KEY: &str = "departments";
const SLOT_LAYERS_KEY: &str = "slot_layers";

pub struct KasbonService<R = OrgChartResolver> {
    instance: Arc<sled::Db>,
    kasbons: sled::Tree,
    slot_requests: sled::Tree,
    settings: sled::Tree,
    activity: SledActivityLog,
    sink: Arc<dyn ActivitySink>,
    resolver: R,
    rules: PathRules,
    write_lock: Mutex<()>,
}

fn load<T>(tree: &sled::Tree, key: &str, kind: &'static str) -> anyhow::Result<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    let bytes = tree.get(key.as_bytes())?.ok_or_else(|| KasbonError::NotFound {
        kind,
        id: key.to_string(),
    })?;
    minicbor::decode(&bytes).with_context(|| format!("failed to decode {kind} {key}"))
}

fn load_all<T>(tree: &sled::Tree, kind: &'static str) -> anyhow::Result<Vec<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    tree.iter()
        .map(|entry| {
            let (_, bytes) = entry?;
            minicbor::decode(&bytes).with_context(|| format!("failed to decode {kind}"))
        })
        .collect()
}

fn save<T>(tree: &sled::Tree, key: &str, value: &T) -> anyhow::Result<()>
where
    T: minicbor::Encode<()>,
{
    tree.insert(key.as_bytes(), minicbor::to_vec(value)?)?;
    Ok(())
}

impl KasbonService<OrgChartResolver> {
    /// Open the database at `config.storage.path`.
    pub fn open(config: &KasbonConfig) -> anyhow::Result<Self> {
        let path = &config.storage.path;
        let db = sled::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Self::new(Arc::new(db), config)
    }

    /// Open the service with the org-chart resolver built from `config.teams`.
    pub fn new(instance: Arc<sled::Db>, config: &KasbonConfig) -> anyhow::Result<Self> {
        Self::with_resolver(instance, config, config.resolver())
    }
}

impl<R: ApproverResolver> KasbonService<R> {
    pub fn with_resolver(
        instance: Arc<sled::Db>,
        config: &KasbonConfig,
        resolver: R,
    ) -> anyhow::Result<Self> {
        let kasbons = instance.open_tree(KASBON_TREE)?;
        let slot_requests = instance.open_tree(SLOT_REQUEST_TREE)?;
        let settings = instance.open_tree(SETTINGS_TREE)?;
        let activity = SledActivityLog::new(instance.open_tree(ACTIVITY_TREE)?);

        // seed only what an earlier run has not stored
        if !settings.contains_key(MATRIX_KEY)? {
            save(&settings, MATRIX_KEY, &config.matrix_set()?)?;
        }
        if !settings.contains_key(DEPARTMENTS_KEY)? {
            save(&settings, DEPARTMENTS_KEY, &config.department_policies()?)?;
        }
        if !settings.contains_key(SLOT_LAYERS_KEY)? {
            save(&settings, SLOT_LAYERS_KEY, &config.slots.exception_layers)?;
        }

        Ok(Self {
            instance,
            kasbons,
            slot_requests,
            settings,
            sink: Arc::new(activity.clone()),
            activity,
            resolver,
            rules: config.path_rules(),
            write_lock: Mutex::new(()),
        })
    }

    /// Send audit entries somewhere other than the `activity` tree.
    pub fn with_activity_sink(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        self.instance.flush()?;
        Ok(())
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn audit(&self, entry: ActivityEntry) {
        activity::record(self.sink.as_ref(), entry);
    }

    pub fn matrix(&self) -> anyhow::Result<MatrixSet> {
        load(&self.settings, MATRIX_KEY, "setting")
    }

    pub fn department_policies(&self) -> anyhow::Result<DepartmentPolicies> {
        load(&self.settings, DEPARTMENTS_KEY, "setting")
    }

    pub fn slot_layers(&self) -> anyhow::Result<Vec<String>> {
        load(&self.settings, SLOT_LAYERS_KEY, "setting")
    }

    pub fn matrix_coverage(&self) -> anyhow::Result<Vec<CoverageIssue>> {
        Ok(self.matrix()?.coverage_gaps())
    }

    /// Replace one tier in place and record the edit.
    pub fn update_matrix_tier(&self, tier: MatrixConfig, actor: &str) -> anyhow::Result<MatrixSet> {
        let _guard = self.write_guard();

        let mut matrix = self.matrix()?;
        let details = format!(
            "Tier {}: {} - {} | {}",
            tier.id,
            tier.min_amount,
            tier.max_amount
                .map_or_else(|| "unlimited".to_string(), |max| max.to_string()),
            tier.layers.join(" > ")
        );
        matrix.replace_tier(tier)?;
        save(&self.settings, MATRIX_KEY, &matrix)?;

        info!(event_name = "kasbon.policy.matrix_updated", actor, %details, "matrix tier updated");
        for issue in matrix.coverage_gaps() {
            warn!(
                event_name = "kasbon.policy.matrix_coverage",
                issue = ?issue,
                "matrix no longer covers every amount cleanly"
            );
        }
        self.audit(ActivityEntry::new(
            actor,
            "Updated Approval Matrix",
            details,
            ActivityType::Policy,
        ));
        Ok(matrix)
    }

    pub fn update_slot_layers(&self, layers: Vec<String>, actor: &str) -> anyhow::Result<()> {
        validate_slot_layers(&layers).map_err(KasbonError::from)?;
        let _guard = self.write_guard();

        save(&self.settings, SLOT_LAYERS_KEY, &layers)?;
        let details = layers.join(" > ");
        info!(
            event_name = "kasbon.policy.slot_layers_updated",
            actor,
            %details,
            "slot exception layers updated"
        );
        self.audit(ActivityEntry::new(
            actor,
            "Updated Slot Exception Layers",
            details,
            ActivityType::Policy,
        ));
        Ok(())
    }

    pub fn upsert_dept_setting(&self, setting: DeptSetting, actor: &str) -> anyhow::Result<()> {
        let _guard = self.write_guard();

        let mut policies = self.department_policies()?;
        let details = format!(
            "Dept: {} | Max Slots: {} | Outstanding Limit: {}",
            setting.dept_name, setting.max_slots, setting.outstanding_limit
        );
        policies.upsert(setting).map_err(KasbonError::from)?;
        save(&self.settings, DEPARTMENTS_KEY, &policies)?;

        info!(
            event_name = "kasbon.policy.department_updated",
            actor,
            %details,
            "department policy updated"
        );
        self.audit(ActivityEntry::new(
            actor,
            "Updated Department Policy",
            details,
            ActivityType::Policy,
        ));
        Ok(())
    }

    pub fn get_kasbon(&self, id: &str) -> anyhow::Result<KasbonRequest> {
        load(&self.kasbons, id, "kasbon")
    }

    pub fn kasbons(&self) -> anyhow::Result<Vec<KasbonRequest>> {
        load_all(&self.kasbons, "kasbon")
    }

    pub fn kasbons_by_requester(&self, requester: &str) -> anyhow::Result<Vec<KasbonRequest>> {
        Ok(self
            .kasbons()?
            .into_iter()
            .filter(|k| k.requestor == requester)
            .collect())
    }

    /// Pending requests whose current step belongs to `approver`.
    pub fn pending_for_approver(&self, approver: &str) -> anyhow::Result<Vec<KasbonRequest>> {
        Ok(self
            .kasbons()?
            .into_iter()
            .filter(|k| k.status == KasbonStatus::Pending && k.approval_path.pending_for(approver))
            .collect())
    }

    pub fn assess_slots(
        &self,
        requester: &RequesterContext,
        amount: Amount,
    ) -> anyhow::Result<SlotAssessment> {
        let policies = self.department_policies()?;
        Ok(slots::assess(&self.kasbons()?, requester, &policies, amount))
    }

    pub fn slot_exception_required(&self, dept_name: &str) -> anyhow::Result<bool> {
        let policies = self.department_policies()?;
        Ok(slots::slot_exception_required(
            &self.kasbons()?,
            dept_name,
            &policies,
        ))
    }

    /// The chain a draft would get if submitted now. Nothing is stored.
    pub fn preview_path(
        &self,
        draft: &KasbonDraft,
        requester: &RequesterContext,
    ) -> anyhow::Result<ApprovalPath> {
        let amount = draft.routable_amount().map_err(KasbonError::from)?;
        let assessment = self.assess_slots(requester, amount)?;
        let path = build_approval_path(
            amount,
            assessment.is_over_slot(),
            &self.matrix()?,
            requester,
            &self.resolver,
            &self.rules,
        )?;
        Ok(path)
    }

    pub fn submit_kasbon(
        &self,
        draft: &KasbonDraft,
        requester: &RequesterContext,
    ) -> anyhow::Result<Submission> {
        let _guard = self.write_guard();

        let matrix = self.matrix()?;
        let policies = self.department_policies()?;
        let existing = self.kasbons()?;
        let routing = Routing {
            matrix: &matrix,
            policies: &policies,
            rules: &self.rules,
            resolver: &self.resolver,
        };

        let id = new_uuid_to_bech32(KASBON_HRP)?;
        let mut submission = lifecycle::submit_kasbon(id, draft, requester, &existing, &routing)?;
        submission.request.matrix_digest = Some(matrix.digest()?);
        save(&self.kasbons, &submission.request.id, &submission.request)?;

        let request = &submission.request;
        info!(
            event_name = "kasbon.kasbon.submitted",
            id = %request.id,
            requestor = %request.requestor,
            amount = request.amount,
            slot = request.slot,
            steps = request.approval_path.len(),
            "kasbon submitted"
        );
        if submission.assessment.is_over_slot() {
            warn!(
                event_name = "kasbon.kasbon.over_slot",
                id = %request.id,
                slot = submission.assessment.slot,
                max_slots = submission.assessment.max_slots,
                "over-slot kasbon submitted with justification"
            );
        }
        if submission.assessment.exceeds_outstanding_limit {
            warn!(
                event_name = "kasbon.kasbon.outstanding_limit",
                id = %request.id,
                department = %request.department,
                outstanding = submission.assessment.department_outstanding,
                "department outstanding limit exceeded"
            );
        }
        Ok(submission)
    }

    /// Load, apply `transition`, store. Nothing is written when it fails.
    fn transition<T, F>(&self, id: &str, transition: F) -> anyhow::Result<(KasbonRequest, T)>
    where
        F: FnOnce(&mut KasbonRequest) -> Result<T, KasbonError>,
    {
        let mut request = self.get_kasbon(id)?;
        let outcome = transition(&mut request)?;
        save(&self.kasbons, id, &request)?;
        Ok((request, outcome))
    }

    pub fn approve_kasbon(
        &self,
        id: &str,
        step_index: usize,
        actor: &str,
    ) -> anyhow::Result<KasbonRequest> {
        let _guard = self.write_guard();
        let (request, status) = self.transition(id, |r| r.approve_step(step_index))?;

        info!(
            event_name = "kasbon.kasbon.step_approved",
            id,
            actor,
            step = step_index,
            status = ?status,
            "kasbon step approved"
        );
        Ok(request)
    }

    pub fn reject_kasbon(
        &self,
        id: &str,
        step_index: usize,
        actor: &str,
    ) -> anyhow::Result<KasbonRequest> {
        let _guard = self.write_guard();
        let (request, ()) = self.transition(id, |r| r.reject_step(step_index))?;

        info!(
            event_name = "kasbon.kasbon.rejected",
            id,
            actor,
            step = step_index,
            "kasbon rejected"
        );
        Ok(request)
    }

    pub fn revoke_kasbon(
        &self,
        id: &str,
        reason: &str,
        actor: &str,
    ) -> anyhow::Result<KasbonRequest> {
        let _guard = self.write_guard();
        let (request, entry) = self.transition(id, |r| r.revoke(reason, actor))?;

        info!(event_name = "kasbon.kasbon.revoked", id, actor, "kasbon revoked");
        self.audit(entry);
        Ok(request)
    }

    pub fn disburse_kasbon(&self, id: &str, actor: &str) -> anyhow::Result<KasbonRequest> {
        let _guard = self.write_guard();
        let (request, ()) = self.transition(id, KasbonRequest::disburse)?;

        info!(
            event_name = "kasbon.kasbon.disbursed",
            id,
            actor,
            amount = request.amount,
            "kasbon disbursed"
        );
        Ok(request)
    }

    pub fn realize_kasbon(
        &self,
        id: &str,
        items: Vec<KasbonItem>,
    ) -> anyhow::Result<KasbonRequest> {
        let _guard = self.write_guard();
        let (request, ()) = self.transition(id, |r| r.realize(items))?;

        info!(
            event_name = "kasbon.kasbon.settled",
            id,
            realized = request.realization_total().unwrap_or_default(),
            balance = request.settlement_balance().unwrap_or_default(),
            "kasbon realized and settled"
        );
        Ok(request)
    }

    pub fn flag_overdue(&self, id: &str, overdue: bool) -> anyhow::Result<KasbonRequest> {
        let _guard = self.write_guard();
        let (request, ()) = self.transition(id, |r| {
            r.set_overdue(overdue);
            Ok(())
        })?;
        Ok(request)
    }

    pub fn get_slot_request(&self, id: &str) -> anyhow::Result<SlotRequest> {
        load(&self.slot_requests, id, "slot request")
    }

    pub fn slot_requests(&self) -> anyhow::Result<Vec<SlotRequest>> {
        load_all(&self.slot_requests, "slot request")
    }

    /// Ask to raise the requester's department quota from its current value by one.
    /// Only one request per department may be pending at a time.
    pub fn request_slot(
        &self,
        requester: &RequesterContext,
        reason: &str,
        requested_slots: u32,
    ) -> anyhow::Result<SlotRequest> {
        let _guard = self.write_guard();

        if let Some(pending) = self
            .pending_slot_requests()?
            .into_iter()
            .find(|r| r.department == requester.department)
        {
            return Err(KasbonError::InvalidStateTransition {
                action: "request slot exception",
                state: format!("pending request {}", pending.id),
            }
            .into());
        }
        let current = self
            .department_policies()?
            .effective(&requester.department)
            .max_slots;
        let request = open_slot_request(
            new_uuid_to_bech32(SLOT_HRP)?,
            requester,
            reason,
            current,
            requested_slots,
            &self.slot_layers()?,
            &self.resolver,
        )?;
        save(&self.slot_requests, &request.id, &request)?;

        info!(
            event_name = "kasbon.slot.requested",
            id = %request.id,
            department = %request.department,
            current_slots = current,
            requested_slots,
            "slot exception requested"
        );
        Ok(request)
    }

    /// On the final step the request and the raised quota commit together.
    pub fn approve_slot_request(
        &self,
        id: &str,
        step_index: usize,
        actor: &str,
    ) -> anyhow::Result<SlotRequest> {
        let _guard = self.write_guard();

        let mut request = self.get_slot_request(id)?;
        let mut policies = self.department_policies()?;
        let entry = request.approve_step(step_index, &mut policies, actor)?;

        let request_bytes = minicbor::to_vec(&request)?;
        if entry.is_some() {
            let policy_bytes = minicbor::to_vec(&policies)?;
            (&self.slot_requests, &self.settings)
                .transaction(|(requests, settings)| {
                    requests.insert(id.as_bytes(), request_bytes.as_slice())?;
                    settings.insert(DEPARTMENTS_KEY, policy_bytes.as_slice())?;
                    Ok::<(), ConflictableTransactionError<()>>(())
                })
                .map_err(|e| anyhow::anyhow!("failed to commit slot approval {id}: {e:?}"))?;
        } else {
            self.slot_requests.insert(id.as_bytes(), request_bytes)?;
        }

        info!(
            event_name = "kasbon.slot.step_approved",
            id,
            actor,
            step = step_index,
            status = ?request.status,
            "slot exception step approved"
        );
        if let Some(entry) = entry {
            info!(
                event_name = "kasbon.slot.quota_raised",
                department = %request.department,
                max_slots = request.requested_slots,
                "department slot quota raised"
            );
            self.audit(entry);
        }
        Ok(request)
    }

    pub fn reject_slot_request(
        &self,
        id: &str,
        step_index: usize,
        actor: &str,
    ) -> anyhow::Result<SlotRequest> {
        let _guard = self.write_guard();

        let mut request = self.get_slot_request(id)?;
        let entry = request.reject_step(step_index, actor)?;
        save(&self.slot_requests, id, &request)?;

        info!(event_name = "kasbon.slot.rejected", id, actor, "slot exception rejected");
        self.audit(entry);
        Ok(request)
    }

    pub fn pending_slot_requests(&self) -> anyhow::Result<Vec<SlotRequest>> {
        Ok(self
            .slot_requests()?
            .into_iter()
            .filter(|r| r.status == SlotStatus::Pending)
            .collect())
    }

    /// Entries from the `activity` tree, newest first.
    pub fn activity_log(&self, limit: usize) -> anyhow::Result<Vec<ActivityLog>> {
        self.activity.recent(limit)
    }
}

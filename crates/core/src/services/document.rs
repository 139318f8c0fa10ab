//! Document service: upload, metadata edits, versioning and sharing.

use crate::access::ResourceKind;
use crate::audit::AuditAction;
use crate::decision::Decision;
use crate::lifecycle::document::{AccessLevel, Document, DocumentCategory, DocumentStatus, Share};
use crate::lifecycle::{check_transition, LifecycleStatus};
use crate::principal::{require_principal, Principal};
use crate::reference::Ref;
use crate::services::{load, CareContext, Plan};
use crate::store::{RecordStore, Write};
use crate::{CareError, CareResult};
use careflow_registry::Permission;
use careflow_types::{NonEmptyText, PatientId, RecordId, UserId};
use chrono::{DateTime, Utc};
use std::sync::Arc;

const VIEW: &[Permission] = &[Permission::ViewAllDocuments, Permission::ViewDocuments];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocumentAction {
    Upload {
        patient: PatientId,
        title: NonEmptyText,
        description: Option<NonEmptyText>,
        category: DocumentCategory,
        file_name: NonEmptyText,
    },
    EditMetadata {
        id: RecordId,
        title: Option<NonEmptyText>,
        description: Option<NonEmptyText>,
        category: Option<DocumentCategory>,
    },
    NewVersion {
        id: RecordId,
        file_name: NonEmptyText,
        notes: Option<NonEmptyText>,
    },
    Share {
        id: RecordId,
        user: UserId,
        access_level: Option<AccessLevel>,
        expires_at: Option<DateTime<Utc>>,
    },
    RevokeShare {
        id: RecordId,
        user: UserId,
    },
}

impl DocumentAction {
    pub fn target(&self) -> Option<RecordId> {
        match self {
            Self::Upload { .. } => None,
            Self::EditMetadata { id, .. }
            | Self::NewVersion { id, .. }
            | Self::Share { id, .. }
            | Self::RevokeShare { id, .. } => Some(*id),
        }
    }

    fn audit_action(&self) -> AuditAction {
        match self {
            Self::Upload { .. } => AuditAction::Create,
            Self::EditMetadata { .. } => AuditAction::Update,
            Self::NewVersion { .. } => AuditAction::NewVersion,
            Self::Share { .. } => AuditAction::Share,
            Self::RevokeShare { .. } => AuditAction::RevokeShare,
        }
    }
}

#[derive(Clone)]
pub struct DocumentService {
    ctx: CareContext,
    store: Arc<dyn RecordStore<Document>>,
}

impl DocumentService {
    pub fn new(ctx: CareContext, store: Arc<dyn RecordStore<Document>>) -> Self {
        Self { ctx, store }
    }

    pub fn decide(&self, principal: Option<&Principal>, action: &DocumentAction) -> Decision {
        Decision::from_plan(&self.plan(principal, action), Plan::next_state)
    }

    pub fn apply(
        &self,
        principal: Option<&Principal>,
        action: DocumentAction,
    ) -> CareResult<Document> {
        self.ctx.audited(
            principal,
            action.audit_action(),
            ResourceKind::Document,
            action.target(),
            || {
                let stored = self.plan(principal, &action)?.execute(self.store.as_ref())?;
                tracing::info!(
                    document = %stored.id,
                    version = stored.version,
                    shares = stored.shared_with.len(),
                    "document written"
                );
                Ok(stored)
            },
        )
    }

    pub fn plan(
        &self,
        principal: Option<&Principal>,
        action: &DocumentAction,
    ) -> CareResult<Plan<Document>> {
        let principal = require_principal(principal)?;
        let engine = self.ctx.engine();
        let now = self.ctx.now();
        let current = DocumentStatus::Current.as_str();
        match action {
            DocumentAction::Upload {
                patient,
                title,
                description,
                category,
                file_name,
            } => {
                engine.require_permission(principal, Permission::UploadDocuments)?;
                if !self.ctx.directory().patient_exists(*patient) {
                    return Err(CareError::InvalidInput(format!(
                        "patient {patient} does not exist"
                    )));
                }
                let document = Document {
                    id: RecordId::new(),
                    revision: 0,
                    title: title.clone(),
                    description: description.clone(),
                    category: *category,
                    file_name: file_name.clone(),
                    patient: Ref::Id(*patient),
                    uploaded_by: Ref::Id(principal.user_id),
                    version: 1,
                    status: DocumentStatus::Current,
                    version_notes: None,
                    replaces: None,
                    replaced_by: None,
                    shared_with: Vec::new(),
                    created_at: now,
                    updated_at: now,
                };
                Ok(Plan::new(Write::create(document), Some(current)))
            }
            DocumentAction::EditMetadata {
                id,
                title,
                description,
                category,
            } => {
                engine.require_permission(principal, Permission::EditDocuments)?;
                let mut next = self.load_managed(principal, *id)?;
                engine.require_modify(&next, &self.ctx.subject(principal))?;
                if let Some(title) = title {
                    next.title = title.clone();
                }
                if let Some(description) = description {
                    next.description = Some(description.clone());
                }
                if let Some(category) = category {
                    next.category = *category;
                }
                next.updated_at = now;
                Ok(Plan::new(Write::update(next), Some(current)))
            }
            DocumentAction::NewVersion {
                id,
                file_name,
                notes,
            } => {
                engine.require_permission(principal, Permission::UploadDocuments)?;
                let previous = self.load_managed(principal, *id)?;
                let superseded = check_transition(previous.status, DocumentStatus::Superseded)?;

                let successor = Document {
                    id: RecordId::new(),
                    revision: 0,
                    file_name: file_name.clone(),
                    uploaded_by: Ref::Id(principal.user_id),
                    version: previous.version + 1,
                    status: DocumentStatus::Current,
                    version_notes: notes.clone(),
                    replaces: Some(previous.id),
                    replaced_by: None,
                    created_at: now,
                    updated_at: now,
                    ..previous.clone()
                };
                let mut retired = previous;
                retired.status = superseded;
                retired.replaced_by = Some(successor.id);
                retired.updated_at = now;

                // Superseding first means a lost race leaves no orphaned successor behind.
                Ok(Plan::new(Write::update(retired), Some(current))
                    .followed_by(Write::create(successor)))
            }
            DocumentAction::Share {
                id,
                user,
                access_level,
                expires_at,
            } => {
                engine.require_permission(principal, Permission::ShareDocuments)?;
                let mut next = self.load_live(principal, *id)?;
                if !self.ctx.directory().user_exists(*user) {
                    return Err(CareError::NotFound("user".into()));
                }
                if expires_at.is_some_and(|at| at <= now) {
                    return Err(CareError::InvalidInput(
                        "share expiry must be in the future".into(),
                    ));
                }
                let existing = next.shared_with.iter().find(|s| s.user == *user);
                let level = access_level
                    .or_else(|| existing.map(|s| s.access_level))
                    .unwrap_or_default();
                next.upsert_share(Share {
                    user: *user,
                    access_level: level,
                    expires_at: *expires_at,
                    shared_by: principal.user_id,
                    shared_at: now,
                });
                next.updated_at = now;
                Ok(Plan::new(Write::update(next), Some(current)))
            }
            DocumentAction::RevokeShare { id, user } => {
                engine.require_permission(principal, Permission::ShareDocuments)?;
                let mut next = self.load_live(principal, *id)?;
                if !next.revoke_share(*user) {
                    return Err(CareError::NotFound("share".into()));
                }
                next.updated_at = now;
                Ok(Plan::new(Write::update(next), Some(current)))
            }
        }
    }

    pub fn get(&self, principal: Option<&Principal>, id: RecordId) -> CareResult<Document> {
        let principal = require_principal(principal)?;
        self.ctx.engine().require_any(principal, VIEW)?;
        let document = load(self.store.as_ref(), ResourceKind::Document, id)?;
        self.ctx
            .engine()
            .require_access(&document, &self.ctx.subject(principal))?;
        Ok(document)
    }

    /// The live version of the chain `id` belongs to, following `replaced_by` links.
    pub fn latest(&self, principal: Option<&Principal>, id: RecordId) -> CareResult<Document> {
        let mut document = self.get(principal, id)?;
        while let Some(next) = document.replaced_by {
            document = self.get(principal, next)?;
        }
        Ok(document)
    }

    /// Live documents the principal may see, newest first.
    pub fn list_visible(&self, principal: Option<&Principal>) -> CareResult<Vec<Document>> {
        let principal = require_principal(principal)?;
        self.ctx.engine().require_any(principal, VIEW)?;
        let subject = self.ctx.subject(principal);
        let engine = self.ctx.engine();
        let mut visible = self
            .store
            .find(&|d: &Document| d.is_current() && engine.can_access(d, &subject))?;
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(visible)
    }

    /// Loads a document only its uploader or an admin may manage.
    fn load_managed(&self, principal: &Principal, id: RecordId) -> CareResult<Document> {
        let document = load(self.store.as_ref(), ResourceKind::Document, id)?;
        if !principal.is_admin() && !document.uploaded_by.is(principal.user_id) {
            return Err(CareError::ResourceAccessDenied {
                kind: ResourceKind::Document,
            });
        }
        Ok(document)
    }

    fn load_live(&self, principal: &Principal, id: RecordId) -> CareResult<Document> {
        let document = self.load_managed(principal, id)?;
        if !document.is_current() {
            return Err(CareError::InvalidTransition(
                "shares are managed on the current version of a document".into(),
            ));
        }
        Ok(document)
    }
}

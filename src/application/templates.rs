//! Template CRUD with image blobs.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::application::access::AccessService;
use crate::application::error::AppError;
use crate::application::repos::{TasksRepo, TemplateFilter, TemplatesRepo};
use crate::domain::entities::{TemplateRecord, UserId, UserRecord, short_id};
use crate::domain::error::DomainError;
use crate::infra::blobs::BlobStorage;

/// Plain message limit of the delivery service.
pub const MAX_TEXT_CHARS: usize = 4096;
/// Caption limit when an image is attached.
pub const MAX_CAPTION_CHARS: usize = 1024;

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub struct CreateTemplateCommand {
    pub name: String,
    pub group_id: String,
    pub text: String,
    pub image: Option<ImageUpload>,
    pub subgroup: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub enum ImageChange {
    #[default]
    Keep,
    Remove,
    Replace(ImageUpload),
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTemplateCommand {
    pub id: String,
    pub name: Option<String>,
    pub group_id: Option<String>,
    pub text: Option<String>,
    pub image: ImageChange,
}

#[derive(Clone)]
pub struct TemplateService {
    access: AccessService,
    templates: Arc<dyn TemplatesRepo>,
    tasks: Arc<dyn TasksRepo>,
    blobs: Arc<BlobStorage>,
}

impl TemplateService {
    pub fn new(
        access: AccessService,
        templates: Arc<dyn TemplatesRepo>,
        tasks: Arc<dyn TasksRepo>,
        blobs: Arc<BlobStorage>,
    ) -> Self {
        Self {
            access,
            templates,
            tasks,
            blobs,
        }
    }

    pub async fn create_template(
        &self,
        operator: UserId,
        command: CreateTemplateCommand,
        now: DateTime<Utc>,
    ) -> Result<TemplateRecord, AppError> {
        let user = self.access.resolve(operator).await?;
        if !self.access.oracle().can_create_template(&user) {
            return Err(AppError::denied("create template"));
        }
        self.require_group(&user, &command.group_id).await?;

        let name = normalize_name(&command.name)?;
        validate_body(&command.text, command.image.is_some())?;

        let image_ref = match command.image {
            Some(image) => Some(self.store_image(image).await?),
            None => None,
        };

        let template = TemplateRecord {
            id: short_id(),
            name,
            group_id: command.group_id,
            text: command.text,
            image_ref,
            created_by: user.id,
            created_at: now,
            subgroup: command.subgroup.filter(|s| !s.trim().is_empty()),
        };

        if let Err(err) = self.templates.upsert_template(&template).await {
            if let Some(blob) = template.image_ref.as_deref() {
                self.discard_blob(blob).await;
            }
            return Err(err.into());
        }

        info!(
            target = "tidings::application::templates",
            template_id = %template.id,
            group_id = %template.group_id,
            has_image = template.image_ref.is_some(),
            "template created"
        );
        Ok(template)
    }

    pub async fn update_template(
        &self,
        operator: UserId,
        command: UpdateTemplateCommand,
    ) -> Result<TemplateRecord, AppError> {
        let user = self.access.resolve(operator).await?;
        if !self.access.oracle().can_create_template(&user) {
            return Err(AppError::denied("edit template"));
        }
        let current = self.load(&command.id).await?;
        self.require_group(&user, &current.group_id).await?;

        let mut next = current.clone();
        if let Some(name) = command.name.as_deref() {
            next.name = normalize_name(name)?;
        }
        if let Some(group_id) = command.group_id {
            self.require_group(&user, &group_id).await?;
            next.group_id = group_id;
        }
        if let Some(text) = command.text {
            next.text = text;
        }

        let has_image = match &command.image {
            ImageChange::Keep => current.image_ref.is_some(),
            ImageChange::Remove => false,
            ImageChange::Replace(_) => true,
        };
        validate_body(&next.text, has_image)?;

        match command.image {
            ImageChange::Keep => {}
            ImageChange::Remove => next.image_ref = None,
            ImageChange::Replace(image) => {
                next.image_ref = Some(self.store_image(image).await?);
            }
        }

        if let Err(err) = self.templates.upsert_template(&next).await {
            if next.image_ref != current.image_ref {
                if let Some(blob) = next.image_ref.as_deref() {
                    self.discard_blob(blob).await;
                }
            }
            return Err(err.into());
        }

        if next.image_ref != current.image_ref {
            if let Some(old) = current.image_ref.as_deref() {
                self.release_replaced_blob(old).await;
            }
        }

        info!(
            target = "tidings::application::templates",
            template_id = %next.id,
            "template updated"
        );
        Ok(next)
    }

    /// Removes the row, then its blob. Tasks keep their snapshot text.
    pub async fn delete_template(&self, operator: UserId, id: &str) -> Result<(), AppError> {
        let user = self.access.resolve(operator).await?;
        if !self.access.oracle().can_create_template(&user) {
            return Err(AppError::denied("delete template"));
        }
        let template = self.load(id).await?;
        self.require_group(&user, &template.group_id).await?;

        if !self.templates.delete_template(id).await?.applied() {
            return Err(AppError::not_found("template", id));
        }
        if let Some(blob) = template.image_ref.as_deref() {
            self.discard_blob(blob).await;
        }

        info!(
            target = "tidings::application::templates",
            template_id = %id,
            "template deleted"
        );
        Ok(())
    }

    pub async fn get_template(&self, operator: UserId, id: &str) -> Result<TemplateRecord, AppError> {
        let user = self.access.resolve(operator).await?;
        let template = self.load(id).await?;
        if !self.access.oracle().can_read_group(&user, &template.group_id) {
            return Err(AppError::denied("read template group"));
        }
        Ok(template)
    }

    pub async fn list_templates(&self, operator: UserId) -> Result<Vec<TemplateRecord>, AppError> {
        let user = self.access.resolve(operator).await?;
        let filter = if self.access.oracle().is_admin(&user) {
            TemplateFilter::default()
        } else {
            TemplateFilter {
                group_ids: Some(user.template_groups.clone()),
            }
        };
        let templates = self.templates.list_templates(&filter).await?;
        Ok(templates
            .into_iter()
            .filter(|t| self.access.oracle().can_read_group(&user, &t.group_id))
            .collect())
    }

    async fn load(&self, id: &str) -> Result<TemplateRecord, AppError> {
        self.templates
            .get_template(id)
            .await?
            .ok_or_else(|| AppError::not_found("template", id))
    }

    async fn require_group(&self, user: &UserRecord, group_id: &str) -> Result<(), AppError> {
        if !self.access.oracle().can_read_group(user, group_id) {
            return Err(AppError::denied("use template group"));
        }
        if self.access.group(group_id).await?.is_none() {
            return Err(AppError::not_found("group", group_id));
        }
        Ok(())
    }

    async fn store_image(&self, image: ImageUpload) -> Result<String, AppError> {
        let stored = self.blobs.store(&image.file_name, image.bytes).await?;
        debug!(
            target = "tidings::application::templates",
            blob_ref = %stored.blob_ref,
            checksum = %stored.checksum,
            size_bytes = stored.size_bytes,
            "template image stored"
        );
        Ok(stored.blob_ref)
    }

    /// Task snapshots taken before the edit keep sending the old image.
    async fn release_replaced_blob(&self, blob_ref: &str) {
        match self.tasks.image_in_use(blob_ref).await {
            Ok(false) => self.discard_blob(blob_ref).await,
            Ok(true) => info!(
                target = "tidings::application::templates",
                blob_ref,
                "previous image kept for task snapshots"
            ),
            Err(err) => warn!(
                target = "tidings::application::templates",
                blob_ref,
                error = %err,
                "could not check task snapshots; previous image kept"
            ),
        }
    }

    async fn discard_blob(&self, blob_ref: &str) {
        if let Err(err) = self.blobs.delete(blob_ref).await {
            warn!(
                target = "tidings::application::templates",
                blob_ref,
                error = %err,
                "failed to delete template image"
            );
        }
    }
}

fn normalize_name(name: &str) -> Result<String, DomainError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("template name must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn validate_body(text: &str, has_image: bool) -> Result<(), DomainError> {
    if text.trim().is_empty() && !has_image {
        return Err(DomainError::validation(
            "message text must not be empty without an image",
        ));
    }
    let limit = if has_image {
        MAX_CAPTION_CHARS
    } else {
        MAX_TEXT_CHARS
    };
    let length = text.chars().count();
    if length > limit {
        return Err(DomainError::validation(format!(
            "message text has {length} characters; the limit is {limit}"
        )));
    }
    Ok(())
}

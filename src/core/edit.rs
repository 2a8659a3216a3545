//! 编辑协调器：用修改后的指令单独重跑一个已结束的任务
//!
//! 与主批次流程独立：只调用一次后端，不走重试策略；失败只落在该任务上。
//! 失败任务的「重试」也走这里，指令为原自定义指令或按模板解析出的 Prompt。

use crate::backend::{AspectRatio, GenerationBackend, GenerationRequest};
use crate::catalog::{build_prompt, Style};
use crate::core::{
    BatchKey, ImageData, OrchestratorContext, OrchestratorError, Task, TaskUpdate, Transition,
};

/// 一次编辑所需的全部输入
#[derive(Debug, Clone)]
pub struct EditRequest {
    pub key: BatchKey,
    pub style: Style,
    /// 直接作为 Prompt 使用，不再做模板替换
    pub prompt: String,
    /// 成功后写入任务的 customInstruction
    pub custom_instruction: Option<String>,
    pub image: ImageData,
    pub aspect_ratio: AspectRatio,
}

#[derive(Debug, Default)]
pub struct EditCoordinator;

impl EditCoordinator {
    fn settled_task<'a>(
        ctx: &'a OrchestratorContext,
        style: &Style,
    ) -> Result<(BatchKey, &'a Task), OrchestratorError> {
        let key = ctx.active_key().ok_or(OrchestratorError::NoActiveBatch)?;
        let batch = ctx.batch.as_ref().ok_or(OrchestratorError::NoActiveBatch)?;
        let task = batch
            .task(style)
            .ok_or_else(|| OrchestratorError::UnknownStyle(style.clone()))?;
        if !task.status.is_terminal() {
            return Err(OrchestratorError::TaskNotSettled(style.clone()));
        }
        Ok((key, task))
    }

    /// 用户给出完整指令文本的编辑
    pub fn prepare_edit(
        ctx: &OrchestratorContext,
        style: &Style,
        instruction: &str,
    ) -> Result<EditRequest, OrchestratorError> {
        let (key, _) = Self::settled_task(ctx, style)?;
        let batch = ctx.batch.as_ref().ok_or(OrchestratorError::NoActiveBatch)?;
        Ok(EditRequest {
            key,
            style: style.clone(),
            prompt: instruction.to_string(),
            custom_instruction: Some(instruction.to_string()),
            image: batch.source_image.clone(),
            aspect_ratio: batch.aspect_ratio,
        })
    }

    /// 以原指令重试（失败任务的「重试」按钮）
    pub fn prepare_retry(
        ctx: &OrchestratorContext,
        style: &Style,
    ) -> Result<EditRequest, OrchestratorError> {
        let (key, task) = Self::settled_task(ctx, style)?;
        let batch = ctx.batch.as_ref().ok_or(OrchestratorError::NoActiveBatch)?;
        let prompt = match &task.custom_instruction {
            Some(instruction) => instruction.clone(),
            None => build_prompt(style, &batch.subject, None),
        };
        Ok(EditRequest {
            key,
            style: style.clone(),
            prompt,
            custom_instruction: task.custom_instruction.clone(),
            image: batch.source_image.clone(),
            aspect_ratio: batch.aspect_ratio,
        })
    }

    /// 单次调用后端，返回待聚合的更新
    pub async fn run(backend: &dyn GenerationBackend, req: EditRequest) -> TaskUpdate {
        let request = GenerationRequest::new(Some(req.image), req.prompt, req.aspect_ratio)
            .with_style(req.style.clone());

        let transition = match backend.generate(&request).await {
            Ok(output) => {
                tracing::info!(style = %req.style, "Edit generated");
                Transition::Edited {
                    output,
                    custom_instruction: req.custom_instruction,
                }
            }
            Err(e) => {
                tracing::warn!(style = %req.style, error = %e, "Edit failed");
                Transition::EditFailed {
                    reason: e.to_string(),
                }
            }
        };
        TaskUpdate {
            key: req.key,
            style: req.style,
            transition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GenerationError, MockGenerationBackend};
    use crate::catalog::SubjectMode;
    use crate::core::{SubjectDescriptor, TaskStatus};

    fn settled_ctx() -> OrchestratorContext {
        let mut ctx = OrchestratorContext::new(SubjectMode::Product, AspectRatio::Square);
        ctx.select_source(ImageData::new("image/png", b"S".to_vec()), SubjectDescriptor::default());
        ctx.begin_batch().unwrap();
        for task in ctx.batch.as_mut().unwrap().tasks.values_mut() {
            task.status = TaskStatus::Failed {
                reason: "boom".into(),
            };
            task.attempt = 1;
        }
        ctx
    }

    #[test]
    fn test_prepare_rejects_unsettled_and_unknown() {
        let mut ctx = OrchestratorContext::default();
        assert_eq!(
            EditCoordinator::prepare_edit(&ctx, &"HERO".into(), "x").unwrap_err(),
            OrchestratorError::NoActiveBatch
        );

        ctx.select_source(ImageData::new("image/png", vec![1]), SubjectDescriptor::default());
        ctx.begin_batch().unwrap();
        assert_eq!(
            EditCoordinator::prepare_edit(&ctx, &"HERO".into(), "x").unwrap_err(),
            OrchestratorError::TaskNotSettled("HERO".into())
        );
        assert_eq!(
            EditCoordinator::prepare_edit(&ctx, &"HEADSHOT".into(), "x").unwrap_err(),
            OrchestratorError::UnknownStyle("HEADSHOT".into())
        );
    }

    #[test]
    fn test_retry_uses_template_or_previous_instruction() {
        let mut ctx = settled_ctx();
        let req = EditCoordinator::prepare_retry(&ctx, &"HERO".into()).unwrap();
        assert_eq!(req.prompt, build_prompt(&"HERO".into(), &SubjectDescriptor::default(), None));
        assert_eq!(req.custom_instruction, None);

        ctx.batch
            .as_mut()
            .unwrap()
            .tasks
            .get_mut(&Style::from("HERO"))
            .unwrap()
            .custom_instruction = Some("make it blue".into());
        let req = EditCoordinator::prepare_retry(&ctx, &"HERO".into()).unwrap();
        assert_eq!(req.prompt, "make it blue");
        assert_eq!(req.custom_instruction.as_deref(), Some("make it blue"));
    }

    #[tokio::test]
    async fn test_run_single_call_without_retry() {
        let ctx = settled_ctx();
        let backend = MockGenerationBackend::new()
            .script("HERO", Err(GenerationError::RateLimited("429".into())));
        let req = EditCoordinator::prepare_edit(&ctx, &"HERO".into(), "verbatim text").unwrap();

        let update = EditCoordinator::run(&backend, req).await;
        assert!(matches!(update.transition, Transition::EditFailed { .. }));
        let calls = backend.calls_for("HERO");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].prompt, "verbatim text");
    }
}

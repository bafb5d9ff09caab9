//! Bundled expense-tracker service (`exp`).
//!
//! A family expense book: `child` users record their own spending, `parent`
//! users can edit or delete any child's entries. Exercises multi-syntax
//! commands, per-service roles, storage, and interactive-context hooks.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::router::context::{
    ContextHook, HandlerContext, HandlerReply, HandlerResult, HookFuture, HookInput,
    InteractiveContext, ListItem,
};
use crate::schema::loader::ServiceLoaderBuilder;
use crate::schema::{CommandDefinition, ParameterDefinition, ServiceDefinition, Syntax};

use super::handler;

/// Storage list holding the expense records.
const STORE: &str = "expenses";

/// The service definition.
pub fn definition() -> ServiceDefinition {
    ServiceDefinition {
        id: "exp".to_owned(),
        display_name: "Expenses".to_owned(),
        description: "Track shared expenses".to_owned(),
        roles: vec![
            "admin".to_owned(),
            "member".to_owned(),
            "parent".to_owned(),
            "child".to_owned(),
        ],
        allow_in_private_chat: false,
        one_cmd_per_msg: false,
        commands: vec![
            CommandDefinition::simple(
                "add",
                "Record an expense",
                vec![
                    ParameterDefinition::required("amount", "int", "Amount"),
                    ParameterDefinition::required("item", "string", "Item"),
                ],
            ),
            CommandDefinition::simple("list", "Show recorded expenses", vec![]),
            CommandDefinition::simple("total", "Show the running total", vec![]),
            CommandDefinition {
                name: "edit".to_owned(),
                description: "Change a recorded expense".to_owned(),
                interactive: true,
                allowed_roles: vec![],
                syntaxes: vec![
                    Syntax::new(
                        &["child"],
                        vec![
                            ParameterDefinition::required("item_no", "int", "Item number"),
                            ParameterDefinition::optional("price", "int", "New price"),
                            ParameterDefinition::optional("item", "word", "New name"),
                        ],
                    ),
                    Syntax::new(
                        &["parent"],
                        vec![
                            ParameterDefinition::required("child_no", "int", "Child number"),
                            ParameterDefinition::required("item_no", "int", "Item number"),
                            ParameterDefinition::optional("price", "int", "New price"),
                            ParameterDefinition::optional("item", "word", "New name"),
                        ],
                    ),
                ],
            },
            CommandDefinition {
                name: "delete".to_owned(),
                description: "Remove a recorded expense".to_owned(),
                interactive: true,
                allowed_roles: vec![],
                syntaxes: vec![
                    Syntax::new(
                        &["child"],
                        vec![ParameterDefinition::required("item_no", "int", "Item number")],
                    ),
                    Syntax::new(
                        &["parent"],
                        vec![
                            ParameterDefinition::required("child_no", "int", "Child number"),
                            ParameterDefinition::required("item_no", "int", "Item number"),
                        ],
                    ),
                ],
            },
        ],
        settings: vec![],
        storage: vec![STORE.to_owned()],
    }
}

/// Attach the expense handlers and interactive hooks.
pub fn register(builder: ServiceLoaderBuilder) -> ServiceLoaderBuilder {
    builder
        .handler("exp", "add", handler(|ctx| Box::pin(add(ctx))))
        .handler("exp", "list", handler(|ctx| Box::pin(list(ctx))))
        .handler("exp", "total", handler(|ctx| Box::pin(total(ctx))))
        .handler("exp", "edit", handler(|ctx| Box::pin(edit(ctx))))
        .handler("exp", "delete", handler(|ctx| Box::pin(delete(ctx))))
        .context_hook("exp", "add", add_hook())
        .context_hook("exp", "edit", pick_item_hook())
        .context_hook("exp", "delete", pick_item_hook())
}

fn sum_amounts(records: &[Value]) -> i64 {
    records
        .iter()
        .filter_map(|r| r.get("amount").and_then(Value::as_i64))
        .fold(0i64, i64::saturating_add)
}

async fn add(ctx: HandlerContext) -> HandlerResult {
    let amount = ctx.require_i64("amount")?;
    let item = ctx.require_str("item")?.to_owned();

    ctx.storage_add(
        STORE,
        json!({ "item": item, "amount": amount, "by": ctx.ctx.user_id }),
    )
    .await?;
    let all = ctx.storage_all(STORE).await?;
    let new_total = sum_amounts(&all);
    Ok(format!("Added: {item} - {amount} (new total: {new_total})").into())
}

async fn list(ctx: HandlerContext) -> HandlerResult {
    let all = ctx.storage_all(STORE).await?;
    if all.is_empty() {
        return Ok("No expenses recorded yet".into());
    }
    let mut lines = vec!["*Expenses*".to_owned()];
    for (i, record) in all.iter().enumerate() {
        let item = record.get("item").and_then(Value::as_str).unwrap_or("?");
        let amount = record.get("amount").and_then(Value::as_i64).unwrap_or(0);
        let by = record.get("by").and_then(Value::as_str).unwrap_or("?");
        let name = ctx.resolve_user_name(by).await;
        lines.push(format!("{}. {item} - {amount} ({name})", i.saturating_add(1)));
    }
    lines.push(format!("Total: {}", sum_amounts(&all)));
    Ok(lines.join("\n").into())
}

async fn total(ctx: HandlerContext) -> HandlerResult {
    let all = ctx.storage_all(STORE).await?;
    Ok(format!("Total: {}", sum_amounts(&all)).into())
}

/// Resolve the record targeted by an edit/delete invocation.
///
/// With `child_no` bound (parent syntax) the item number counts within that
/// child's records; otherwise it counts within the caller's own records.
async fn target_record(ctx: &HandlerContext) -> anyhow::Result<Result<Value, String>> {
    let owner = match ctx.arg_i64("child_no") {
        Some(child_no) => {
            let children = ctx.users_with_role("child").await?;
            let index = usize::try_from(child_no.saturating_sub(1)).unwrap_or(usize::MAX);
            match children.get(index) {
                Some(child) => child.clone(),
                None => return Ok(Err(format!("there is no child #{child_no}"))),
            }
        }
        None => ctx.ctx.user_id.clone(),
    };

    let item_no = ctx.require_i64("item_no")?;
    let service = ctx.require_service()?;
    let owned = ctx
        .storage
        .query(&ctx.ctx.chat_id, service, STORE, Some(&json!({ "by": owner })))
        .await?;
    let index = usize::try_from(item_no.saturating_sub(1)).unwrap_or(usize::MAX);
    match owned.get(index) {
        Some(record) => Ok(Ok(record.clone())),
        None => Ok(Err(format!("there is no item #{item_no}"))),
    }
}

async fn edit(ctx: HandlerContext) -> HandlerResult {
    let record = match target_record(&ctx).await? {
        Ok(record) => record,
        Err(reason) => return Ok(HandlerReply::Error(reason)),
    };
    let id = record
        .get("_id")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("record without _id"))?;

    let mut patch = serde_json::Map::new();
    if let Some(price) = ctx.arg_i64("price") {
        patch.insert("amount".to_owned(), Value::from(price));
    }
    if let Some(item) = ctx.arg_str("item") {
        patch.insert("item".to_owned(), Value::from(item));
    }
    if patch.is_empty() {
        return Ok(HandlerReply::Error("nothing to change".to_owned()));
    }

    let service = ctx.require_service()?;
    let updated = ctx
        .storage
        .update(&ctx.ctx.chat_id, service, STORE, id, Value::Object(patch))
        .await?
        .ok_or_else(|| anyhow::anyhow!("record vanished during update"))?;
    let item = updated.get("item").and_then(Value::as_str).unwrap_or("?");
    let amount = updated.get("amount").and_then(Value::as_i64).unwrap_or(0);
    Ok(format!("Updated: {item} - {amount}").into())
}

async fn delete(ctx: HandlerContext) -> HandlerResult {
    let record = match target_record(&ctx).await? {
        Ok(record) => record,
        Err(reason) => return Ok(HandlerReply::Error(reason)),
    };
    let id = record
        .get("_id")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("record without _id"))?;
    let service = ctx.require_service()?;
    ctx.storage.delete(&ctx.ctx.chat_id, service, STORE, id).await?;
    let item = record.get("item").and_then(Value::as_str).unwrap_or("?");
    Ok(format!("Deleted: {item}").into())
}

/// Context for `add`: show the running total above the first prompt.
fn add_hook() -> ContextHook {
    Arc::new(|input: HookInput| -> HookFuture {
        Box::pin(async move {
            if input.param != "amount" {
                return None;
            }
            let all = input
                .storage
                .query(&input.chat_id, &input.service, STORE, None)
                .await
                .ok()?;
            if all.is_empty() {
                return None;
            }
            Some(InteractiveContext::Text(format!(
                "Current total: {}",
                sum_amounts(&all)
            )))
        })
    })
}

/// Context for `edit`/`delete`: enumerate the candidate records when the
/// item number is prompted, echo the selection afterwards.
fn pick_item_hook() -> ContextHook {
    Arc::new(|input: HookInput| -> HookFuture {
        Box::pin(async move {
            let owner = match input.args.get("child_no").and_then(Value::as_i64) {
                Some(child_no) => {
                    let children = input
                        .state
                        .users_with_role(&input.chat_id, &input.service, "child")
                        .await;
                    let index = usize::try_from(child_no.saturating_sub(1)).ok()?;
                    children.get(index)?.clone()
                }
                None => input.user_id.clone(),
            };
            let owned = input
                .storage
                .query(
                    &input.chat_id,
                    &input.service,
                    STORE,
                    Some(&json!({ "by": owner })),
                )
                .await
                .ok()?;

            match input.param.as_str() {
                "item_no" => Some(InteractiveContext::List {
                    items: owned
                        .iter()
                        .map(|r| ListItem {
                            label: r.get("item").and_then(Value::as_str).unwrap_or("?").to_owned(),
                            sublabel: r
                                .get("amount")
                                .and_then(Value::as_i64)
                                .map(|a| a.to_string()),
                        })
                        .collect(),
                    empty_message: Some("No expenses to pick from.".to_owned()),
                }),
                _ => {
                    let item_no = input.args.get("item_no").and_then(Value::as_i64)?;
                    let index = usize::try_from(item_no.saturating_sub(1)).ok()?;
                    let record = owned.get(index)?;
                    Some(InteractiveContext::Selected(ListItem {
                        label: record
                            .get("item")
                            .and_then(Value::as_str)
                            .unwrap_or("?")
                            .to_owned(),
                        sublabel: record
                            .get("amount")
                            .and_then(Value::as_i64)
                            .map(|a| a.to_string()),
                    }))
                }
            }
        })
    })
}

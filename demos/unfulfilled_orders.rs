//! 未出貨訂單快取示例

use chrono::Utc;
use recache::{
    CallbackPayload, CallbackPoint, ChangeEvent, EngineConfig, EntityKey, FieldMap, FieldValue,
    MemoryStore, RecacheService, Record, RecordStore, Rule,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    println!("=== 未出貨訂單快取示例 ===\n");

    let store = Arc::new(MemoryStore::new());
    let service = RecacheService::new(store.clone(), EngineConfig::default())?;
    tracing::info!("服務已啟動，建立重試上限 {} 次", service.config().retry.max_attempts);

    // 客戶的未出貨金額：監聽訂單狀態、金額與客戶
    service.registry.register(
        Rule::builder("unfulfilled_total")
            .owner_table("customers")
            .watch("orders", ["status", "amount", "customer_id"])
            .compute(|customer, store| {
                let total: Decimal = store
                    .find_by("orders", "customer_id", &FieldValue::Uuid(customer.id()))?
                    .iter()
                    .filter(|o| o.get("status").as_str() == Some("unfulfilled"))
                    .filter_map(|o| o.get("amount").as_decimal())
                    .sum();
                Ok(FieldValue::Decimal(total))
            })
            .resolve_affected(|event, store| {
                let customer = match store.find(&event.record)? {
                    Some(order) => order.get("customer_id").as_uuid(),
                    None => event.old_value("customer_id").and_then(FieldValue::as_uuid),
                };
                Ok(customer
                    .map(|id| vec![EntityKey::new("customers", id)])
                    .unwrap_or_default())
            }),
    )?;

    service
        .bus
        .subscribe(CallbackPoint::RecalculationApplied, |payload| {
            if let CallbackPayload::RecalculationApplied(change) = payload {
                println!(
                    "  快取更新 {} {}: {} → {}",
                    change.key, change.field, change.old_value, change.new_value
                );
            }
            Ok(())
        });

    let customer = store.insert(
        Record::new("customers", Uuid::new_v4()).with_field("unfulfilled_total", Decimal::ZERO),
    )?;

    let amounts = [Decimal::new(12_050, 2), Decimal::new(8_000, 2)];
    let mut orders = Vec::new();
    for amount in amounts {
        let order = store.insert(
            Record::new("orders", Uuid::new_v4())
                .with_field("customer_id", customer.id())
                .with_field("status", "unfulfilled")
                .with_field("amount", amount)
                .with_field("placed_at", Utc::now()),
        )?;
        orders.push(order);
    }

    println!("回填客戶快取:");
    let report = service
        .engine
        .recalculate_table("customers", &["unfulfilled_total"])?;
    println!("  寫入 {} 筆\n", report.writes);

    println!("第一筆訂單出貨:");
    let mut writes = FieldMap::new();
    writes.insert("status".to_string(), FieldValue::from("shipped"));
    store.update_fields(&orders[0].key, &writes)?;
    let event = ChangeEvent::update(orders[0].key.clone())
        .with_change("status", "unfulfilled", "shipped");
    let outcome = service.engine.handle_change(&event)?;
    println!("  寫入 {} 筆\n", outcome.recalculated.writes);

    println!("與持久層一致時重送同一事件:");
    let outcome = service.engine.handle_change(&event)?;
    println!("  無變更: {}", outcome.recalculated.is_noop());

    let stored = store
        .find(&customer.key)?
        .ok_or_else(|| anyhow::anyhow!("客戶 {} 不存在", customer.key))?;
    println!("\n目前未出貨金額: {}", stored.get("unfulfilled_total"));

    Ok(())
}

//! 集成測試

use recache::*;
use rstest::rstest;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const UNFULFILLED: &str = "unfulfilled";
const SHIPPED: &str = "shipped";

/// 未出貨訂單數：監聽 orders 的 status 與 customer_id
fn unfulfilled_count_rule(owner_table: &str) -> RuleBuilder {
    Rule::builder("unfulfilled_count")
        .owner_table(owner_table)
        .watch("orders", ["status", "customer_id"])
        .compute(|customer, store| {
            let orders = store.find_by("orders", "customer_id", &FieldValue::Uuid(customer.id()))?;
            let count = orders
                .iter()
                .filter(|o| o.get("status").as_str() == Some(UNFULFILLED))
                .count();
            Ok(FieldValue::from(count))
        })
        .resolve_affected(|event, store| {
            // 刪除事件只剩舊值；其他情況讀取訂單目前的客戶
            let mut customers = Vec::new();
            if let Some(old) = event.old_value("customer_id").and_then(FieldValue::as_uuid) {
                customers.push(old);
            }
            if let Some(order) = store.find(&event.record)? {
                if let Some(current) = order.get("customer_id").as_uuid() {
                    if !customers.contains(&current) {
                        customers.push(current);
                    }
                }
            }
            Ok(customers
                .into_iter()
                .map(|id| EntityKey::new("customers", id))
                .collect())
        })
}

struct Shop {
    store: Arc<MemoryStore>,
    service: RecacheService,
    events: Arc<Mutex<Vec<AppliedChange>>>,
}

fn shop() -> Shop {
    let store = Arc::new(MemoryStore::new());
    let service = RecacheService::new(store.clone(), EngineConfig::default()).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    service
        .bus
        .subscribe(CallbackPoint::RecalculationApplied, move |payload| {
            if let CallbackPayload::RecalculationApplied(change) = payload {
                sink.lock().unwrap().push(change.clone());
            }
            Ok(())
        });

    Shop {
        store,
        service,
        events,
    }
}

fn insert_customer(store: &MemoryStore, cached: i64) -> Record {
    store
        .insert(Record::new("customers", Uuid::new_v4()).with_field("unfulfilled_count", cached))
        .unwrap()
}

fn insert_order(store: &MemoryStore, customer: &Record, status: &str) -> Record {
    store
        .insert(
            Record::new("orders", Uuid::new_v4())
                .with_field("customer_id", customer.id())
                .with_field("status", status),
        )
        .unwrap()
}

/// 模擬外部變更偵測：寫入訂單狀態並產生事件
fn set_status(store: &MemoryStore, order: &Record, from: &str, to: &str) -> ChangeEvent {
    let mut writes = FieldMap::new();
    writes.insert("status".to_string(), FieldValue::from(to));
    store.update_fields(&order.key, &writes).unwrap();
    ChangeEvent::update(order.key.clone()).with_change("status", from, to)
}

#[test]
fn test_shipping_an_order_decrements_count() {
    let shop = shop();
    shop.service.registry.register(unfulfilled_count_rule("customers")).unwrap();

    let customer = insert_customer(&shop.store, 2);
    let first = insert_order(&shop.store, &customer, UNFULFILLED);
    insert_order(&shop.store, &customer, UNFULFILLED);

    let event = set_status(&shop.store, &first, UNFULFILLED, SHIPPED);
    let outcome = shop.service.engine.handle_change(&event).unwrap();

    assert_eq!(outcome.recalculated.writes, 1);
    let stored = shop.store.find(&customer.key).unwrap().unwrap();
    assert_eq!(stored.get("unfulfilled_count"), &FieldValue::Integer(1));

    let events = shop.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].key, customer.key);
    assert_eq!(events[0].old_value, FieldValue::Integer(2));
    assert_eq!(events[0].new_value, FieldValue::Integer(1));
}

#[test]
fn test_compensating_change_fires_nothing() {
    let shop = shop();
    shop.service.registry.register(unfulfilled_count_rule("customers")).unwrap();

    let customer = insert_customer(&shop.store, 2);
    let shipped = insert_order(&shop.store, &customer, UNFULFILLED);
    insert_order(&shop.store, &customer, UNFULFILLED);
    let reopened = insert_order(&shop.store, &customer, SHIPPED);

    // 兩筆變更在事件送達前都已寫入，真實數量仍是 2
    let event = set_status(&shop.store, &shipped, UNFULFILLED, SHIPPED);
    set_status(&shop.store, &reopened, SHIPPED, UNFULFILLED);

    let outcome = shop.service.engine.handle_change(&event).unwrap();

    assert!(outcome.recalculated.is_noop());
    assert_eq!(shop.store.writes_for(&customer.key), 0);
    assert!(shop.events.lock().unwrap().is_empty());
}

#[test]
fn test_moving_order_updates_both_customers() {
    let shop = shop();
    shop.service.registry.register(unfulfilled_count_rule("customers")).unwrap();

    let ada = insert_customer(&shop.store, 1);
    let grace = insert_customer(&shop.store, 0);
    let order = insert_order(&shop.store, &ada, UNFULFILLED);

    let mut writes = FieldMap::new();
    writes.insert("customer_id".to_string(), FieldValue::Uuid(grace.id()));
    shop.store.update_fields(&order.key, &writes).unwrap();
    let event =
        ChangeEvent::update(order.key.clone()).with_change("customer_id", ada.id(), grace.id());

    shop.service.engine.handle_change(&event).unwrap();

    let ada = shop.store.find(&ada.key).unwrap().unwrap();
    let grace = shop.store.find(&grace.key).unwrap().unwrap();
    assert_eq!(ada.get("unfulfilled_count"), &FieldValue::Integer(0));
    assert_eq!(grace.get("unfulfilled_count"), &FieldValue::Integer(1));
    assert_eq!(shop.events.lock().unwrap().len(), 2);
}

#[test]
fn test_destroyed_order_uses_old_values() {
    let shop = shop();
    shop.service.registry.register(unfulfilled_count_rule("customers")).unwrap();

    let customer = insert_customer(&shop.store, 1);
    let order = insert_order(&shop.store, &customer, UNFULFILLED);
    shop.store.remove(&order.key);

    let event = ChangeEvent::destroy(order.key.clone())
        .with_change("customer_id", customer.id(), FieldValue::Null)
        .with_change("status", UNFULFILLED, FieldValue::Null);
    shop.service.engine.handle_change(&event).unwrap();

    let stored = shop.store.find(&customer.key).unwrap().unwrap();
    assert_eq!(stored.get("unfulfilled_count"), &FieldValue::Integer(0));
}

#[rstest]
#[case(2, 2, 0)]
#[case(5, 2, 1)]
#[case(0, 2, 1)]
fn test_manual_backfill(
    #[case] cached: i64,
    #[case] open_orders: usize,
    #[case] expected_writes: usize,
) {
    let shop = shop();
    shop.service.registry.register(unfulfilled_count_rule("customers")).unwrap();

    let customer = insert_customer(&shop.store, cached);
    for _ in 0..open_orders {
        insert_order(&shop.store, &customer, UNFULFILLED);
    }

    let report = shop
        .service
        .engine
        .recalculate(&[customer.clone()], &["unfulfilled_count"])
        .unwrap();

    assert_eq!(report.writes, expected_writes);
    assert_eq!(shop.events.lock().unwrap().len(), expected_writes);
    let stored = shop.store.find(&customer.key).unwrap().unwrap();
    assert_eq!(stored.get("unfulfilled_count"), &FieldValue::from(open_orders));
}

#[test]
fn test_dedicated_cache_entity_end_to_end() {
    let shop = shop();
    shop.store.declare_unique("customer_caches", "customer_id");
    shop.service
        .dedicated
        .register(DedicatedAssociation::new(
            "cache",
            "customers",
            "customer_caches",
            "customer_id",
        ))
        .unwrap();

    // 快取欄位存放在專屬實體上：以 customer_id 反查訂單
    let dedicated = shop.service.dedicated.clone();
    let rule = Rule::builder("unfulfilled_count")
        .owner_table("customer_caches")
        .watch("orders", ["status"])
        .compute(|cache, store| {
            let orders = store.find_by("orders", "customer_id", cache.get("customer_id"))?;
            Ok(FieldValue::from(
                orders
                    .iter()
                    .filter(|o| o.get("status").as_str() == Some(UNFULFILLED))
                    .count(),
            ))
        })
        .resolve_affected(move |event, store| {
            let Some(order) = store.find(&event.record)? else {
                return Ok(Vec::new());
            };
            let Some(customer_id) = order.get("customer_id").as_uuid() else {
                return Ok(Vec::new());
            };
            let Some(customer) = store.find(&EntityKey::new("customers", customer_id))? else {
                return Ok(Vec::new());
            };
            let cache = dedicated.get_or_create(&ParentRecord::new(customer))?;
            Ok(vec![cache.key])
        });
    shop.service.registry.register(rule).unwrap();

    // 新建的專屬實體在回傳前先填入初始值
    let engine = shop.service.engine.clone();
    shop.service
        .bus
        .subscribe(CallbackPoint::DedicatedEntityCreated, move |payload| {
            if let CallbackPayload::DedicatedEntityCreated { record, .. } = payload {
                engine.recalculate(&[record.clone()], &["unfulfilled_count"])?;
            }
            Ok(())
        });

    let customer = shop
        .store
        .insert(Record::new("customers", Uuid::new_v4()))
        .unwrap();
    let first = insert_order(&shop.store, &customer, UNFULFILLED);
    insert_order(&shop.store, &customer, UNFULFILLED);

    let parent = ParentRecord::new(customer.clone());
    let cache = shop.service.dedicated.get_or_create(&parent).unwrap();
    assert_eq!(cache.get("unfulfilled_count"), &FieldValue::Integer(2));

    let event = set_status(&shop.store, &first, UNFULFILLED, SHIPPED);
    shop.service.engine.handle_change(&event).unwrap();

    let cache = shop.store.find(&cache.key).unwrap().unwrap();
    assert_eq!(cache.get("unfulfilled_count"), &FieldValue::Integer(1));
    assert_eq!(shop.store.count("customer_caches"), 1);
}

#[test]
fn test_registry_dedup_through_service() {
    let shop = shop();
    let rule = Arc::new(unfulfilled_count_rule("customers").build().unwrap());

    let after_first = shop.service.registry.register(rule.clone()).unwrap().len();
    let after_second = shop.service.registry.register(rule).unwrap().len();

    assert_eq!(after_first, after_second);
}

#[test]
fn test_service_from_json_config() {
    let raw = serde_json::json!({
        "retry": { "max_attempts": 5, "backoff_step_ms": 10 },
        "warn_on_duplicate_rules": false
    })
    .to_string();
    let config = EngineConfig::from_json_str(&raw).unwrap();

    let service = RecacheService::new(Arc::new(MemoryStore::new()), config).unwrap();
    assert_eq!(service.config().retry.max_attempts, 5);
    assert!(!service.config().warn_on_duplicate_rules);
}

#[test]
fn test_service_rejects_zero_attempts_config() {
    let err = EngineConfig::from_json_str(r#"{ "retry": { "max_attempts": 0 } }"#).unwrap_err();
    assert!(err.is_configuration());
}

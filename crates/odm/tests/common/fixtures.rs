//! Entity fixtures.
//!
//! | Entity | Collection | Shape |
//! |--------|------------|-------|
//! | `Person` | `Person` | `father` and `child` reference `Person` (cycles) |
//! | `Holder` | `Holder` | `x`, `y` reference `Edge` |
//! | `Edge` | `Edge` | `target` references `Target` |
//! | `Target` | `Target` | scalar `label` |
//! | `Order` | `orders_<key>` | split by caller key |
//! | `Invoice` | `invoices_<region>` | split by the `region` field |
//! | `AuditEntry` | `audit_log` | capped at 3 documents |
//! | `User` / `Customer` | `users` / `customers` | joined on `username` |
//! | `Draft` | `drafts` | `reviewer` references `Target`, cascades `create` only |

use std::sync::Arc;

use serde_json::{Value, json};

use helios_odm::backends::memory::MemoryStore;
use helios_odm::metadata::{
    CascadeOperation, CascadePermissions, Entity, EntityDeclaration, MetadataRegistry,
};
use helios_odm::{DynStore, EntityManager, EntityRef, OdmConfig, SaveOperation};

pub struct Person;
impl Entity for Person {
    fn declaration() -> EntityDeclaration {
        EntityDeclaration::new("Person")
            .scalar("name")
            .reference::<Person>("father", CascadePermissions::all())
            .reference::<Person>("child", CascadePermissions::all())
    }
}

pub struct Target;
impl Entity for Target {
    fn declaration() -> EntityDeclaration {
        EntityDeclaration::new("Target").scalar("label")
    }
}

pub struct Edge;
impl Entity for Edge {
    fn declaration() -> EntityDeclaration {
        EntityDeclaration::new("Edge")
            .scalar("name")
            .reference::<Target>("target", CascadePermissions::all())
    }
}

pub struct Holder;
impl Entity for Holder {
    fn declaration() -> EntityDeclaration {
        EntityDeclaration::new("Holder")
            .reference::<Edge>("x", CascadePermissions::all())
            .reference::<Edge>("y", CascadePermissions::all())
    }
}

pub struct Order;
impl Entity for Order {
    fn declaration() -> EntityDeclaration {
        EntityDeclaration::new("Order")
            .collection("orders")
            .split_by_key()
            .scalar("total")
    }
}

pub struct Invoice;
impl Entity for Invoice {
    fn declaration() -> EntityDeclaration {
        EntityDeclaration::new("Invoice")
            .collection("invoices")
            .split_by_field("region")
            .scalar("region")
            .scalar("amount")
    }
}

pub struct AuditEntry;
impl Entity for AuditEntry {
    fn declaration() -> EntityDeclaration {
        EntityDeclaration::new("AuditEntry")
            .collection("audit_log")
            .capped(4096, Some(3))
            .scalar("message")
    }
}

pub struct User;
impl Entity for User {
    fn declaration() -> EntityDeclaration {
        EntityDeclaration::new("User").collection("users").scalar("username")
    }
}

pub struct Customer;
impl Entity for Customer {
    fn declaration() -> EntityDeclaration {
        EntityDeclaration::new("Customer")
            .collection("customers")
            .scalar("username")
            .scalar("tier")
    }
}

pub struct Draft;
impl Entity for Draft {
    fn declaration() -> EntityDeclaration {
        EntityDeclaration::new("Draft")
            .collection("drafts")
            .scalar("title")
            .scalar("note")
            .reference::<Target>("reviewer", CascadePermissions::of([CascadeOperation::Create]))
    }
}

/// Creates a manager over a fresh in-memory store with every fixture registered.
pub fn create_manager() -> (EntityManager, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let manager = create_manager_with(store.clone(), OdmConfig::default());
    (manager, store)
}

/// Creates a manager over the given store with every fixture registered.
pub fn create_manager_with(store: DynStore, config: OdmConfig) -> EntityManager {
    let manager = EntityManager::with_registry(Arc::new(MetadataRegistry::new()), store, config)
        .expect("Failed to create entity manager");
    manager
        .register::<Person>()
        .register::<Holder>()
        .register::<Edge>()
        .register::<Target>()
        .register::<Order>()
        .register::<Invoice>()
        .register::<AuditEntry>()
        .register::<User>()
        .register::<Customer>()
        .register::<Draft>();
    manager
}

/// Builds an unsaved instance with scalar fields set.
pub fn build<T: 'static>(manager: &EntityManager, fields: &[(&str, Value)]) -> EntityRef {
    let mut instance = manager.create::<T>().expect("entity is registered");
    for (field, value) in fields {
        instance.set(field, value.clone()).expect("field is declared");
    }
    instance.into_ref()
}

/// Builds `root -> {x, y}`, `x.target = z`, `y.target = z`.
pub fn diamond(manager: &EntityManager) -> (EntityRef, EntityRef) {
    let z = build::<Target>(manager, &[("label", json!("z"))]);
    let edge = |name: &str| {
        let edge = build::<Edge>(manager, &[("name", json!(name))]);
        edge.write().set_reference("target", &z).expect("reference field");
        edge
    };
    let (x, y) = (edge("x"), edge("y"));
    let root = manager.create::<Holder>().expect("entity is registered").into_ref();
    {
        let mut holder = root.write();
        holder.set_reference("x", &x).expect("reference field");
        holder.set_reference("y", &y).expect("reference field");
    }
    (root, z)
}

/// Saves the diamond graph and returns the root identifier.
pub async fn save_diamond(manager: &EntityManager) -> String {
    let (root, _) = diamond(manager);
    manager
        .cascade_save(&root, SaveOperation::Create)
        .await
        .expect("Failed to save diamond");
    let id = root.read().id().expect("saved root has an id").to_string();
    id
}

/// Saves a user or customer with the given username.
pub async fn save_named<T: 'static>(manager: &EntityManager, username: &str) -> EntityRef {
    let instance = build::<T>(manager, &[("username", json!(username))]);
    manager
        .cascade_save(&instance, SaveOperation::Create)
        .await
        .expect("Failed to save entity");
    instance
}

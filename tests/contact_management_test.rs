use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use sms_shield::db::Database;
use sms_shield::error::ShieldError;
use sms_shield::models::{ContactUpdate, NewContact, TrustStatus};

fn known(name: &str, phone: &str) -> NewContact {
    NewContact {
        name: name.to_string(),
        phone_number: phone.to_string(),
        status: TrustStatus::Known,
    }
}

#[test]
fn test_resolve_creates_contact_once() {
    let db = Database::in_memory().expect("Failed to create database");

    let (first, created) = db
        .resolve_or_create_contact("+1 (555) 010-0001", None, TrustStatus::Unknown)
        .expect("Failed to resolve contact");
    assert!(created);
    assert_eq!(first.phone_number, "+15550100001");
    assert_eq!(first.name, "+15550100001");
    assert_eq!(first.status, TrustStatus::Unknown);

    let (second, created) = db
        .resolve_or_create_contact("+15550100001", Some("Ignored"), TrustStatus::Known)
        .expect("Failed to resolve contact");
    assert!(!created);
    assert_eq!(second, first);
    assert_eq!(db.list_contacts().unwrap().len(), 1);
}

#[test]
fn test_resolve_uses_directory_name() {
    let db = Database::in_memory().unwrap();
    let (contact, _) = db
        .resolve_or_create_contact("5550100", Some("  Alice  "), TrustStatus::Unknown)
        .unwrap();
    assert_eq!(contact.name, "Alice");

    let (blank, _) = db
        .resolve_or_create_contact("5550200", Some("   "), TrustStatus::Unknown)
        .unwrap();
    assert_eq!(blank.name, "5550200");
}

#[test]
fn test_resolve_rejects_blank_address() {
    let db = Database::in_memory().unwrap();
    let err = db
        .resolve_or_create_contact("   ", None, TrustStatus::Unknown)
        .unwrap_err();
    assert!(matches!(err, ShieldError::InvalidInput(_)));
}

#[test]
fn test_resolve_keeps_alphanumeric_sender_id() {
    let db = Database::in_memory().unwrap();
    let (contact, created) = db
        .resolve_or_create_contact(" ALERTS ", None, TrustStatus::Unknown)
        .expect("Failed to resolve sender id");
    assert!(created);
    assert_eq!(contact.phone_number, "ALERTS");
    assert_eq!(contact.name, "ALERTS");

    let (again, created) = db
        .resolve_or_create_contact("ALERTS", None, TrustStatus::Unknown)
        .unwrap();
    assert!(!created);
    assert_eq!(again.id, contact.id);
    assert_eq!(db.get_contact_by_phone("ALERTS").unwrap().map(|c| c.id), Some(contact.id));
}

#[test]
fn test_concurrent_resolve_yields_one_contact() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_url = format!("sqlite:{}", temp_dir.path().join("contacts.db").display());
    let db = Arc::new(Database::new(&db_url).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                db.resolve_or_create_contact("555-0100", None, TrustStatus::Unknown)
                    .unwrap()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|(_, created)| *created).count(), 1);
    assert!(results.iter().all(|(c, _)| c.id == results[0].0.id));
    assert_eq!(db.list_contacts().unwrap().len(), 1);
}

#[test]
fn test_add_contact_rejects_duplicate_number() {
    let db = Database::in_memory().unwrap();

    let contact = db.add_contact(&known("Bob", "555-0100")).expect("Failed to add contact");
    assert_eq!(contact.phone_number, "5550100");
    assert_eq!(contact.status, TrustStatus::Known);

    let err = db.add_contact(&known("Robert", "(555) 0100")).unwrap_err();
    assert!(matches!(err, ShieldError::InvalidInput(_)));
}

#[test]
fn test_add_contact_validates_input() {
    let db = Database::in_memory().unwrap();
    assert!(db.add_contact(&known("", "5550100")).is_err());
    assert!(db.add_contact(&known("Short", "12")).is_err());
    assert!(db.add_contact(&known("Bad plus", "55+50100")).is_err());
    assert!(db.list_contacts().unwrap().is_empty());
}

#[test]
fn test_update_contact_fields() {
    let db = Database::in_memory().unwrap();
    let contact = db.add_contact(&known("Carol", "5550100")).unwrap();

    let updated = db
        .update_contact(
            contact.id,
            &ContactUpdate {
                name: Some("Caroline".to_string()),
                phone_number: Some("+1 555 0101".to_string()),
                status: None,
            },
        )
        .unwrap();
    assert_eq!(updated.name, "Caroline");
    assert_eq!(updated.phone_number, "+15550101");
    assert_eq!(updated.status, TrustStatus::Known);

    // Empty update returns the contact unchanged
    assert_eq!(db.update_contact(contact.id, &ContactUpdate::default()).unwrap(), updated);

    let missing = db.update_contact(
        9_999,
        &ContactUpdate {
            name: Some("Nobody".to_string()),
            ..ContactUpdate::default()
        },
    );
    assert!(matches!(missing, Err(ShieldError::NotFound(_))));
}

#[test]
fn test_update_contact_rejects_taken_number() {
    let db = Database::in_memory().unwrap();
    db.add_contact(&known("Dan", "5550100")).unwrap();
    let erin = db.add_contact(&known("Erin", "5550200")).unwrap();

    let err = db
        .update_contact(
            erin.id,
            &ContactUpdate {
                phone_number: Some("555-0100".to_string()),
                ..ContactUpdate::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, ShieldError::InvalidInput(_)));
}

#[test]
fn test_block_and_unblock() {
    let db = Database::in_memory().unwrap();
    let (contact, _) = db
        .resolve_or_create_contact("5550100", None, TrustStatus::Unknown)
        .unwrap();

    let blocked = db.set_contact_status(contact.id, TrustStatus::Blocked).unwrap();
    assert!(blocked.is_blocked());
    assert_eq!(db.contacts_by_status(TrustStatus::Blocked).unwrap().len(), 1);

    let unblocked = db.set_contact_status(contact.id, TrustStatus::Known).unwrap();
    assert!(!unblocked.is_blocked());
    assert!(db.contacts_by_status(TrustStatus::Blocked).unwrap().is_empty());
}

#[test]
fn test_merge_directory_names() {
    let db = Database::in_memory().unwrap();
    let (stranger, _) = db
        .resolve_or_create_contact("5550001", None, TrustStatus::Unknown)
        .unwrap();
    let (spammer, _) = db
        .resolve_or_create_contact("5550002", None, TrustStatus::Blocked)
        .unwrap();
    let (unlisted, _) = db
        .resolve_or_create_contact("5550003", None, TrustStatus::Unknown)
        .unwrap();

    let snapshot = HashMap::from([
        ("5550001".to_string(), "Frank".to_string()),
        ("5550002".to_string(), "Spam Co".to_string()),
        ("5559999".to_string(), "Not Stored".to_string()),
    ]);

    assert_eq!(db.merge_directory_names(&snapshot).unwrap(), 2);

    let frank = db.get_contact(stranger.id).unwrap().unwrap();
    assert_eq!(frank.name, "Frank");
    assert_eq!(frank.status, TrustStatus::Known);

    let spam_co = db.get_contact(spammer.id).unwrap().unwrap();
    assert_eq!(spam_co.name, "Spam Co");
    assert_eq!(spam_co.status, TrustStatus::Blocked);

    assert_eq!(db.get_contact(unlisted.id).unwrap().unwrap(), unlisted);

    // Merging the same snapshot again changes nothing
    assert_eq!(db.merge_directory_names(&snapshot).unwrap(), 0);
}

#[test]
fn test_search_and_lookup_by_phone() {
    let db = Database::in_memory().unwrap();
    db.add_contact(&known("Grace Hopper", "5550100")).unwrap();
    db.add_contact(&known("Alan Turing", "5550200")).unwrap();

    assert_eq!(db.search_contacts("hopper").unwrap().len(), 1);
    assert_eq!(db.search_contacts("55502").unwrap()[0].name, "Alan Turing");
    assert_eq!(db.search_contacts("55501").unwrap()[0].name, "Grace Hopper");
    assert!(db.search_contacts("nobody").unwrap().is_empty());

    let found = db.get_contact_by_phone("(555) 0200").unwrap().unwrap();
    assert_eq!(found.name, "Alan Turing");

    let names: Vec<String> = db.list_contacts().unwrap().into_iter().map(|c| c.name).collect();
    assert_eq!(names, ["Alan Turing", "Grace Hopper"]);
}

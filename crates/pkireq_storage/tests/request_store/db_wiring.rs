#![forbid(unsafe_code)]

use pkireq_kernel_contracts::ext_data_codec::attribute_name;
use pkireq_kernel_contracts::{now_millis, Request, RequestId, RequestStatus};
use pkireq_storage::record::StoredRequestRecord;
use pkireq_storage::repo::{RequestRepository, StorageError};
use pkireq_storage::store::InMemoryRequestStore;

fn new_saved(store: &InMemoryRequestStore, request_type: &str) -> Request {
    let id = store.create(request_type).unwrap();
    let r = Request::new(id, request_type, now_millis()).unwrap();
    store.save(&r).unwrap();
    r
}

#[test]
fn at_store_db_01_ids_are_monotonic_and_never_reused() {
    let s = InMemoryRequestStore::new_in_memory();
    let a = s.create("enrollment").unwrap();
    let b = s.create("enrollment").unwrap();
    assert_eq!(a, RequestId::from(1u64));
    assert_eq!(b, RequestId::from(2u64));
    // An allocated but never saved id is still consumed.
    assert!(s.is_empty());
    assert_eq!(s.create("revocation").unwrap(), RequestId::from(3u64));
}

#[test]
fn at_store_db_02_read_returns_what_was_saved() {
    let s = InMemoryRequestStore::new_in_memory();
    let mut r = new_saved(&s, "enrollment");
    r.set_owner(Some("uid=alice".to_string()));
    r.ext_data_mut().set_integer("serial", 77).unwrap();
    r.ext_data_mut().set_bytes("blob", vec![0, 1, 254]).unwrap();
    r.approvals_mut().add_approval("agent1");
    s.save(&r).unwrap();

    let back = s.read(r.id()).unwrap();
    assert_eq!(back.owner(), Some("uid=alice"));
    assert_eq!(back.ext_data().get_integer("serial"), Some(77));
    assert_eq!(back.ext_data().get_bytes("blob"), Some(vec![0, 1, 254]));
    assert_eq!(back.approvals().usernames(), vec!["agent1"]);
    assert_eq!(back.status(), RequestStatus::Begin);
}

#[test]
fn at_store_db_03_missing_id_is_not_found() {
    let s = InMemoryRequestStore::new_in_memory();
    let id = RequestId::from(99u64);
    assert_eq!(s.read(&id), Err(StorageError::NotFound { id }));
}

#[test]
fn at_store_db_04_injected_failure_leaves_stored_row_untouched() {
    let s = InMemoryRequestStore::new_in_memory();
    let mut r = new_saved(&s, "enrollment");
    r.set_status(RequestStatus::Pending);

    s.fail_next_save();
    assert!(matches!(s.save(&r), Err(StorageError::Persistence { .. })));
    assert_eq!(s.read(r.id()).unwrap().status(), RequestStatus::Begin);

    // One-shot: the next save goes through.
    s.save(&r).unwrap();
    assert_eq!(s.read(r.id()).unwrap().status(), RequestStatus::Pending);

    s.fail_saves(true);
    assert!(s.save(&r).is_err());
    assert!(s.save(&r).is_err());
    s.fail_saves(false);
    assert!(s.save(&r).is_ok());
}

#[test]
fn at_store_db_05_ext_data_is_persisted_in_attribute_form() {
    let s = InMemoryRequestStore::new_in_memory();
    let mut r = new_saved(&s, "enrollment");
    r.ext_data_mut().set_string("cert-request", "MIIB").unwrap();
    r.ext_data_mut()
        .set_map_entry("subject", "cn", "host.example")
        .unwrap();
    s.save(&r).unwrap();

    let rec = s.stored_record(r.id()).unwrap();
    assert!(rec
        .ext_data
        .contains(&("extData-cert-request".to_string(), "MIIB".to_string())));
    assert!(rec.ext_data.contains(&(
        attribute_name("subject", Some("cn")),
        "host.example".to_string()
    )));
}

#[test]
fn at_store_db_06_corrupt_row_fails_read_and_search_closed() {
    let s = InMemoryRequestStore::new_in_memory();
    let r = new_saved(&s, "enrollment");
    let mut rec = StoredRequestRecord::from_request(&r);
    rec.agent_approvals = Some(vec![";foo".to_string()]);
    s.put_raw_record(rec).unwrap();

    assert!(matches!(
        s.read(r.id()),
        Err(StorageError::CorruptApprovals { .. })
    ));
    assert!(s.search("").is_err());
}

#[test]
fn at_store_db_07_raw_rows_advance_the_id_counter() {
    let s = InMemoryRequestStore::new_in_memory();
    let r = Request::new(RequestId::from(40u64), "renewal", now_millis()).unwrap();
    s.put_raw_record(StoredRequestRecord::from_request(&r)).unwrap();
    assert_eq!(s.create("renewal").unwrap(), RequestId::from(41u64));
}

#![forbid(unsafe_code)]

use pkireq_kernel_contracts::{now_millis, Request, RequestId, RequestStatus};
use pkireq_storage::filter::equals_filter;
use pkireq_storage::repo::{RequestRepository, StorageError};
use pkireq_storage::store::InMemoryRequestStore;

fn seed(
    store: &InMemoryRequestStore,
    request_type: &str,
    status: RequestStatus,
    source_id: Option<&str>,
    realm: Option<&str>,
) -> Request {
    let id = store.create(request_type).unwrap();
    let mut r = Request::new(id, request_type, now_millis()).unwrap();
    r.set_status(status);
    r.set_source_id(source_id.map(ToString::to_string));
    r.set_realm(realm.map(ToString::to_string));
    store.save(&r).unwrap();
    r
}

fn ids(found: &[Request]) -> Vec<String> {
    found.iter().map(|r| r.id().to_string()).collect()
}

fn seeded() -> InMemoryRequestStore {
    let s = InMemoryRequestStore::new_in_memory();
    seed(&s, "enrollment", RequestStatus::Pending, Some("csr-1"), Some("a"));
    seed(&s, "enrollment", RequestStatus::Approved, Some("csr-2"), None);
    seed(&s, "revocation", RequestStatus::Pending, None, Some("b"));
    seed(&s, "renewal", RequestStatus::Complete, Some("csr(4)*"), Some("a"));
    s
}

#[test]
fn at_search_db_01_empty_and_objectclass_match_all_in_id_order() {
    let s = seeded();
    assert_eq!(ids(&s.search("").unwrap()), vec!["1", "2", "3", "4"]);
    assert_eq!(ids(&s.search("(objectclass=*)").unwrap()).len(), 4);
}

#[test]
fn at_search_db_02_status_match_ignores_case() {
    let s = seeded();
    assert_eq!(ids(&s.search("(requestState=pending)").unwrap()), vec!["1", "3"]);
    assert_eq!(ids(&s.search("(REQUESTSTATE=PENDING)").unwrap()), vec!["1", "3"]);
}

#[test]
fn at_search_db_03_composites() {
    let s = seeded();
    let both = s
        .search("(&(requestState=pending)(requestType=enrollment))")
        .unwrap();
    assert_eq!(ids(&both), vec!["1"]);

    let either = s.search("(|(realm=b)(requestState=approved))").unwrap();
    assert_eq!(ids(&either), vec!["2", "3"]);

    let not_a = s.search("(!(realm=a))").unwrap();
    assert_eq!(ids(&not_a), vec!["2", "3"]);
}

#[test]
fn at_search_db_04_presence_skips_absent_columns() {
    let s = seeded();
    assert_eq!(ids(&s.search("(sourceId=*)").unwrap()), vec!["1", "2", "4"]);
    assert!(s.search("(requestOwner=*)").unwrap().is_empty());
}

#[test]
fn at_search_db_05_escaped_source_id_matches_literally() {
    let s = seeded();
    let found = s.search(&equals_filter("sourceId", "csr(4)*")).unwrap();
    assert_eq!(ids(&found), vec!["4"]);
}

#[test]
fn at_search_db_06_invalid_filter_is_an_error_not_an_empty_result() {
    let s = seeded();
    assert!(matches!(
        s.search("(requestState=pending"),
        Err(StorageError::InvalidFilter { .. })
    ));
}

#[test]
fn at_search_db_07_id_search_lists_rows_that_no_longer_decode() {
    let s = seeded();
    let corrupt = RequestId::from(3u64);
    let mut rec = s.stored_record(&corrupt).unwrap();
    rec.agent_approvals = Some(vec!["not-compact".to_string()]);
    s.put_raw_record(rec).unwrap();

    assert!(matches!(
        s.search("(requestState=pending)"),
        Err(StorageError::CorruptApprovals { .. })
    ));
    let found = s.search_ids("(requestState=pending)").unwrap();
    assert_eq!(found, vec![RequestId::from(1u64), corrupt]);
    assert!(matches!(
        s.search_ids("(requestState=pending"),
        Err(StorageError::InvalidFilter { .. })
    ));
}

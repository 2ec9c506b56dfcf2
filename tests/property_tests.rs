use currency_lookup::server::RecordStore;
use currency_lookup::Record;
use proptest::prelude::*;

fn record_strategy() -> impl Strategy<Value = Record> {
    ("[A-Z]{3,12}", "[A-Za-z ]{1,16}", "[A-C]{3}", 0i32..6).prop_map(
        |(country, name, code, number)| Record::new(country, name, code, number),
    )
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime should build")
        .block_on(future)
}

proptest! {
    #[test]
    fn search_returns_exactly_the_matching_records_in_order(
        records in prop::collection::vec(record_strategy(), 0..40),
        code in "[A-C]{3}",
        number in 0i32..6,
    ) {
        let expected = records
            .iter()
            .filter(|r| r.code() == code || (number != 0 && r.number() == number))
            .cloned()
            .collect::<Vec<_>>();

        let store = RecordStore::from_records(records);
        let found = block_on(store.search(&code, number));

        prop_assert_eq!(found, expected);
    }

    #[test]
    fn empty_keys_never_match(records in prop::collection::vec(record_strategy(), 0..40)) {
        let store = RecordStore::from_records(records);
        prop_assert!(block_on(store.search("", 0)).is_empty());
    }

    #[test]
    fn add_appends_after_existing_records(
        initial in prop::collection::vec(record_strategy(), 0..20),
        batch in prop::collection::vec(record_strategy(), 0..20),
    ) {
        let store = RecordStore::from_records(initial.clone());
        block_on(store.add(batch.clone()));

        let mut expected = initial;
        expected.extend(batch);
        prop_assert_eq!(block_on(store.snapshot()), expected);
    }
}

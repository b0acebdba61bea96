//! Pure reconciliation planning: which fetched records must be written.

use std::collections::{HashMap, HashSet};

use dirsync_core::{Record, SurrogateKey};

/// The write-set for one cycle plus what the comparison saw along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Fetched records that are new or differ from their stored version.
    pub upserts: Vec<Record>,
    /// Stored versions of upserted records that already existed.
    pub previous: HashMap<SurrogateKey, Record>,
    /// Fetched records identical to their stored version.
    pub unchanged: usize,
    /// Stored keys the directory no longer returns. Reported, never removed.
    pub stale: Vec<SurrogateKey>,
    pub fetched: usize,
    pub stored: usize,
}

impl Plan {
    /// Compare full snapshots. Equality is structural over the whole record.
    pub fn compute(fetched: Vec<Record>, stored: Vec<Record>) -> Self {
        let fetched_count = fetched.len();
        let stored_count = stored.len();
        let mut by_key: HashMap<SurrogateKey, Record> = stored
            .into_iter()
            .map(|r| (r.surrogate_key.clone(), r))
            .collect();

        let mut seen = HashSet::with_capacity(fetched_count);
        let mut upserts = Vec::new();
        let mut unchanged = 0;
        for record in fetched {
            seen.insert(record.surrogate_key.clone());
            match by_key.get(&record.surrogate_key) {
                Some(existing) if *existing == record => unchanged += 1,
                _ => upserts.push(record),
            }
        }

        let mut previous = HashMap::new();
        for record in &upserts {
            if let Some(old) = by_key.remove(&record.surrogate_key) {
                previous.insert(record.surrogate_key.clone(), old);
            }
        }

        let mut stale: Vec<_> = by_key
            .into_keys()
            .filter(|key| !seen.contains(key))
            .collect();
        stale.sort();

        Self {
            upserts,
            previous,
            unchanged,
            stale,
            fetched: fetched_count,
            stored: stored_count,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.upserts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use dirsync_core::{Attribute, PersonalInfo, SourceKind, UserStatus};
    use rstest::rstest;

    use super::*;

    fn user(name: &str) -> Record {
        Record::from_source(
            UserStatus::Active,
            SourceKind::Ldap,
            PersonalInfo {
                source_id: format!("uid={name},ou=People,dc=example,dc=com"),
                username: name.to_string(),
                email: format!("{name}@example.com"),
                attributes: vec![Attribute::new("badge", "1")],
                ..PersonalInfo::default()
            },
        )
    }

    fn pii(record: &mut Record) -> &mut PersonalInfo {
        record.pii.as_mut().expect("pii")
    }

    #[test]
    fn empty_store_upserts_everything() {
        let plan = Plan::compute(vec![user("alice"), user("bob")], Vec::new());
        assert_eq!(plan.upserts.len(), 2);
        assert!(plan.previous.is_empty());
        assert_eq!(plan.unchanged, 0);
    }

    #[test]
    fn identical_snapshots_are_a_noop() {
        let records = vec![user("alice"), user("bob")];
        let plan = Plan::compute(records.clone(), records);
        assert!(plan.is_noop());
        assert_eq!(plan.unchanged, 2);
        assert!(plan.stale.is_empty());
    }

    #[rstest]
    #[case::status(|r: &mut Record| r.status = UserStatus::Disabled)]
    #[case::source_kind(|r: &mut Record| r.source_kind = SourceKind::ActiveDirectory)]
    #[case::pii_removed(|r: &mut Record| r.pii = None)]
    #[case::username(|r: &mut Record| pii(r).username.push('2'))]
    #[case::email(|r: &mut Record| pii(r).email.clear())]
    #[case::display_name(|r: &mut Record| pii(r).display_name = "A".into())]
    #[case::first_name(|r: &mut Record| pii(r).first_name = "A".into())]
    #[case::last_name(|r: &mut Record| pii(r).last_name = "L".into())]
    #[case::phone(|r: &mut Record| pii(r).phone = "1".into())]
    #[case::department(|r: &mut Record| pii(r).department = "D".into())]
    #[case::title(|r: &mut Record| pii(r).title = "T".into())]
    #[case::manager(|r: &mut Record| pii(r).manager_id = "carol".into())]
    #[case::employee(|r: &mut Record| pii(r).employee_id = "7".into())]
    #[case::location(|r: &mut Record| pii(r).location = "X".into())]
    #[case::attribute_value(|r: &mut Record| pii(r).attributes[0].value = "2".into())]
    #[case::attribute_added(|r: &mut Record| pii(r).attributes.push(Attribute::new("k", "v")))]
    fn any_single_field_change_is_detected(#[case] mutate: fn(&mut Record)) {
        let stored = user("alice");
        let mut fetched = stored.clone();
        mutate(&mut fetched);

        let plan = Plan::compute(vec![fetched.clone(), user("bob")], vec![stored.clone(), user("bob")]);
        assert_eq!(plan.upserts, vec![fetched]);
        assert_eq!(plan.previous.get(&stored.surrogate_key), Some(&stored));
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn attribute_order_counts_as_a_change() {
        let mut stored = user("alice");
        pii(&mut stored).attributes.push(Attribute::new("second", "2"));
        let mut fetched = stored.clone();
        pii(&mut fetched).attributes.reverse();

        let plan = Plan::compute(vec![fetched], vec![stored]);
        assert_eq!(plan.upserts.len(), 1);
    }

    #[test]
    fn departed_records_are_reported_stale_not_removed() {
        let plan = Plan::compute(vec![user("alice")], vec![user("alice"), user("zoe"), user("bob")]);
        assert!(plan.is_noop());
        let mut expected = vec![user("zoe").surrogate_key, user("bob").surrogate_key];
        expected.sort();
        assert_eq!(plan.stale, expected);
        assert_eq!((plan.fetched, plan.stored), (1, 3));
    }
}

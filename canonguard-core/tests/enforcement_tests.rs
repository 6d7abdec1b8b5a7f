// canonguard-core/tests/enforcement_tests.rs
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use canonguard_core::telemetry::{EVENT_ENFORCEMENT_FAILED, EVENT_TEMPLATE_RESTORED};
use canonguard_core::{
    AuditEvent, Enforcer, FingerprintExtractor, Outcome, ProcessedLedger, SchemaConfig, SkipReason,
    TelemetryDispatcher, TemplateRegistry,
};
use tempfile::{tempdir, TempDir};
use tokio::sync::mpsc;

fn declaration(form: &str, sequence: Option<&str>, amount: &str) -> String {
    let so_lan = sequence
        .map(|s| format!("<soLan>{s}</soLan>"))
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<HSoThueDTu xmlns="http://kekhaithue.gdt.gov.vn/TKhaiThue">
  <HSoKhaiThue>
    <TTinChung>
      <TTinTKhaiThue>
        <TKhaiThue>
          <maTKhai>{form}</maTKhai>
          <KyKKhaiThue><kieuKy>Q</kieuKy><kyKKhai>2024Q1</kyKKhai></KyKKhaiThue>
          {so_lan}
        </TKhaiThue>
        <NNT><mst>0123456789</mst><tenNNT>Cong ty ABC</tenNNT></NNT>
      </TTinTKhaiThue>
    </TTinChung>
    <CTieuTKhaiChinh><ct40>{amount}</ct40></CTieuTKhaiChinh>
  </HSoKhaiThue>
</HSoThueDTu>"#
    )
}

struct Fixture {
    _state: TempDir,
    docs: TempDir,
    template_dir: PathBuf,
    ledger_path: PathBuf,
    enforcer: Enforcer,
    events: mpsc::Receiver<AuditEvent>,
}

impl Fixture {
    fn new(templates: &[(&str, String)]) -> Self {
        let state = tempdir().unwrap();
        let docs = tempdir().unwrap();
        let template_dir = state.path().join("templates");
        fs::create_dir_all(&template_dir).unwrap();
        for (name, body) in templates {
            fs::write(template_dir.join(format!("{name}.xml")), body).unwrap();
        }
        let ledger_path = state.path().join("processed.json");

        let registry = Arc::new(TemplateRegistry::new(&template_dir, SchemaConfig::default()));
        let ledger = Arc::new(ProcessedLedger::load(&ledger_path));
        let (telemetry, events) = TelemetryDispatcher::detached(16);
        let enforcer = Enforcer::new(
            registry,
            ledger,
            telemetry,
            vec![state.path().to_path_buf()],
            Duration::from_millis(0),
        );

        Self {
            _state: state,
            docs,
            template_dir,
            ledger_path,
            enforcer,
            events,
        }
    }

    fn target(&self, name: &str, body: &str) -> PathBuf {
        let path = self.docs.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    fn template_bytes(&self, name: &str) -> Vec<u8> {
        fs::read(self.template_dir.join(format!("{name}.xml"))).unwrap()
    }
}

#[test_log::test]
fn test_matching_document_is_restored_from_template() {
    let mut fx = Fixture::new(&[("T1", declaration("01/GTGT", None, "1000"))]);
    let target = fx.target("submission.xml", &declaration("01/GTGT", Some("3"), "999999"));

    let outcome = fx.enforcer.enforce(&target);

    assert!(outcome.is_overwritten(), "unexpected outcome: {outcome}");
    assert_eq!(fs::read(&target).unwrap(), fx.template_bytes("T1"));
    assert!(fx.enforcer.ledger().contains(&target));
    assert!(ProcessedLedger::load(&fx.ledger_path).contains(&target));

    let event = fx.events.try_recv().unwrap();
    assert_eq!(event.event, EVENT_TEMPLATE_RESTORED);
    assert_eq!(event.template.as_deref(), Some("T1"));
    assert_eq!(event.fingerprint.get("taxpayer_id").map(String::as_str), Some("0123456789"));
}

#[test_log::test]
fn test_different_form_code_is_left_alone() {
    let mut fx = Fixture::new(&[("T1", declaration("01/GTGT", None, "1000"))]);
    let body = declaration("02/GTGT", None, "5");
    let target = fx.target("other.xml", &body);

    let outcome = fx.enforcer.enforce(&target);

    assert_eq!(outcome.skip_reason(), Some(SkipReason::Unmatched));
    assert_eq!(fs::read_to_string(&target).unwrap(), body);
    assert!(fx.enforcer.ledger().is_empty());
    assert!(fx.events.try_recv().is_err());
}

#[test_log::test]
fn test_identical_content_is_not_rewritten() {
    let template = declaration("01/GTGT", None, "1000");
    let fx = Fixture::new(&[("T1", template.clone())]);
    let target = fx.target("copy.xml", &template);
    let before = fs::metadata(&target).unwrap().modified().unwrap();

    let outcome = fx.enforcer.enforce(&target);

    assert_eq!(outcome.skip_reason(), Some(SkipReason::AlreadyCanonical));
    assert_eq!(fs::metadata(&target).unwrap().modified().unwrap(), before);
    assert!(fx.enforcer.ledger().is_empty());
    assert!(!fx.ledger_path.exists());
}

#[test_log::test]
fn test_line_ending_difference_is_rewritten() {
    let template = declaration("01/GTGT", None, "1000");
    let fx = Fixture::new(&[("T1", template.clone())]);
    let target = fx.target("crlf.xml", &template.replace('\n', "\r\n"));

    assert!(fx.enforcer.enforce(&target).is_overwritten());
    assert_eq!(fs::read(&target).unwrap(), template.as_bytes());
}

#[test_log::test]
fn test_malformed_document_is_skipped() {
    let fx = Fixture::new(&[("T1", declaration("01/GTGT", None, "1000"))]);
    let body = r#"<HSoThueDTu xmlns="http://kekhaithue.gdt.gov.vn/TKhaiThue"><mst>0123456789"#;
    let target = fx.target("broken.xml", body);

    let outcome = fx.enforcer.enforce(&target);

    assert_eq!(outcome.skip_reason(), Some(SkipReason::NotCandidate));
    assert_eq!(fs::read_to_string(&target).unwrap(), body);
}

#[test_log::test]
fn test_second_pass_is_a_no_op() {
    let fx = Fixture::new(&[("T1", declaration("01/GTGT", None, "1000"))]);
    let target = fx.target("submission.xml", &declaration("01/GTGT", None, "42"));

    assert!(fx.enforcer.enforce(&target).is_overwritten());
    assert_eq!(
        fx.enforcer.enforce(&target).skip_reason(),
        Some(SkipReason::AlreadyCanonical)
    );
    assert_eq!(fx.enforcer.ledger().len(), 1);
}

#[test_log::test]
fn test_restored_document_keeps_its_fingerprint() {
    let fx = Fixture::new(&[("T1", declaration("01/GTGT", None, "1000"))]);
    let target = fx.target("submission.xml", &declaration("01/GTGT", Some("3"), "42"));
    let extractor = FingerprintExtractor::new(SchemaConfig::default());
    let before = extractor.extract(&target).unwrap();
    let template = extractor.extract(&fx.template_dir.join("T1.xml")).unwrap();
    assert_eq!(before.sequence(), Some("3"));

    assert!(fx.enforcer.enforce(&target).is_overwritten());

    let after = extractor.extract(&target).unwrap();
    assert_eq!(after, template);
    assert_eq!(after.sequence(), None);
    assert_eq!(before.identity(), after.identity());
}

#[test_log::test]
fn test_vanished_and_ignored_paths_are_skipped() {
    let fx = Fixture::new(&[("T1", declaration("01/GTGT", None, "1000"))]);

    let gone = fx.docs.path().join("gone.xml");
    assert_eq!(fx.enforcer.enforce(&gone).skip_reason(), Some(SkipReason::Vanished));

    let template_path = fx.template_dir.join("T1.xml");
    assert!(fx.enforcer.is_ignored(&template_path));
    assert_eq!(
        fx.enforcer.enforce(&template_path).skip_reason(),
        Some(SkipReason::Ignored)
    );

    let text = fx.target("notes.txt", &declaration("01/GTGT", None, "42"));
    assert_eq!(fx.enforcer.enforce(&text).skip_reason(), Some(SkipReason::Ignored));
}

#[test_log::test]
fn test_shared_identity_resolves_to_first_template_by_name() {
    let fx = Fixture::new(&[
        ("b_second", declaration("01/GTGT", None, "2")),
        ("a_first", declaration("01/GTGT", None, "1")),
    ]);
    let target = fx.target("submission.xml", &declaration("01/GTGT", None, "42"));

    match fx.enforcer.enforce(&target) {
        Outcome::Overwritten { template } => assert_eq!(template, "a_first"),
        other => panic!("unexpected outcome: {other}"),
    }
}

#[cfg(unix)]
#[test_log::test]
fn test_unwritable_target_reports_failure() {
    use std::os::unix::fs::PermissionsExt;

    let mut fx = Fixture::new(&[("T1", declaration("01/GTGT", None, "1000"))]);
    let target = fx.target("locked.xml", &declaration("01/GTGT", None, "42"));
    fs::set_permissions(&target, fs::Permissions::from_mode(0o444)).unwrap();

    // Privileged users can write regardless of mode bits.
    if fs::OpenOptions::new().write(true).open(&target).is_ok() {
        return;
    }

    let outcome = fx.enforcer.enforce(&target);
    assert!(outcome.is_failed(), "unexpected outcome: {outcome}");
    assert!(fx.enforcer.ledger().is_empty());

    let event = fx.events.try_recv().unwrap();
    assert_eq!(event.event, EVENT_ENFORCEMENT_FAILED);
    assert_eq!(event.template.as_deref(), Some("T1"));
    assert!(event.detail.is_some());
}

#[tokio::test]
async fn test_enforce_after_settle_runs_on_blocking_pool() {
    let fx = Fixture::new(&[("T1", declaration("01/GTGT", None, "1000"))]);
    let target = fx.target("submission.xml", &declaration("01/GTGT", None, "42"));
    let expected = fx.template_bytes("T1");

    let Fixture { enforcer, _state: state, docs, .. } = fx;
    let outcome = Arc::new(enforcer).enforce_after_settle(target.clone()).await;

    assert!(outcome.is_overwritten());
    assert_eq!(fs::read(&target).unwrap(), expected);
    drop((docs, state));
}

#[test_log::test]
fn test_lookup_in_flight_survives_rebuild() {
    let state = tempdir().unwrap();
    let template_dir = state.path().join("templates");
    fs::create_dir_all(&template_dir).unwrap();
    fs::write(template_dir.join("T1.xml"), declaration("01/GTGT", None, "1")).unwrap();

    let registry = Arc::new(TemplateRegistry::new(&template_dir, SchemaConfig::default()));
    let held = registry.snapshot();
    assert_eq!(held.len(), 1);

    fs::write(template_dir.join("T2.xml"), declaration("02/GTGT", None, "2")).unwrap();
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let snapshot = registry.snapshot();
                    let len = snapshot.len();
                    assert!(len == 1 || len == 2);
                    assert_eq!(snapshot.all().len(), len);
                }
            })
        })
        .collect();
    assert_eq!(registry.rebuild(), 2);
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(held.len(), 1);
    assert!(held.lookup("T2").is_none());
    assert!(registry.snapshot().lookup("T2").is_some());
}

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;

/// A checklist with the usual upstream irregularities: a DOCTYPE, HTML
/// entities, a group with repeated Rule elements, a Subject inside the
/// discussion, a DIAGNOSTIC_DEST discussion and a rule without fix text.
pub const SAMPLE_BENCHMARK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE Benchmark SYSTEM "xccdf.dtd">
<Benchmark xmlns="http://checklists.nist.gov/xccdf/1.1" id="Sample_STIG" xml:lang="en">
  <status date="2019-07-26">accepted</status>
  <title>Sample Application Security Technical Implementation Guide</title>
  <description>Developed by DISA&nbsp;for the DoD</description>
  <plain-text id="release-info">Release: 4 Benchmark Date: 26 Jul 2019</plain-text>
  <plain-text id="generator">3.1.0</plain-text>
  <version>2</version>
  <Group id="V-1001">
    <title>SRG-APP-000001</title>
    <Rule id="SV-1001r1_rule" severity="high" weight="10.0">
      <version>SAMP-00-000001</version>
      <title>The application must
limit sessions.</title>
      <description>&lt;VulnDiscussion&gt;Session limits prevent exhaustion.&lt;/VulnDiscussion&gt;&lt;FalsePositives&gt;&lt;/FalsePositives&gt;</description>
      <fixtext fixref="F-1001r1_fix">Set the session limit.</fixtext>
      <check system="C-1001r1_chk"><check-content>Verify the session limit.</check-content></check>
    </Rule>
    <Rule id="SV-1001r0_rule" severity="low">
      <title>Superseded rule</title>
      <description>&lt;VulnDiscussion&gt;Old.&lt;/VulnDiscussion&gt;</description>
    </Rule>
  </Group>
  <Group id="V-1002">
    <title>SRG-APP-000002</title>
    <Rule id="SV-1002r1_rule" severity="medium">
      <title>The application must log events.</title>
      <description>&lt;VulnDiscussion&gt;Logs support R&amp;D &lt;Subject&gt;and auditing.&lt;/Subject&gt;&lt;/VulnDiscussion&gt;</description>
      <fixtext fixref="F-1002r1_fix">Enable logging.</fixtext>
      <check system="C-1002r1_chk"><check-content>Review the log.</check-content></check>
    </Rule>
  </Group>
  <Group id="V-1003">
    <title>SRG-APP-000003</title>
    <Rule id="SV-1003r1_rule" severity="low">
      <title>Audit records must be sent off-host.</title>
      <description>&lt;VulnDiscussion&gt;&lt;DIAGNOSTIC_DEST&gt;Send records to the collector.&lt;/DIAGNOSTIC_DEST&gt;&lt;/VulnDiscussion&gt;</description>
      <check system="C-1003r1_chk"><check-content>Check the collector.</check-content></check>
    </Rule>
  </Group>
  <Group id="V-1004">
    <title>SRG-APP-000004</title>
    <Rule id="SV-1004r1_rule" severity="medium">
      <title>Passwords must be hashed.</title>
      <description>&lt;VulnDiscussion&gt;Stored passwords must not be recoverable.&lt;/VulnDiscussion&gt;</description>
    </Rule>
  </Group>
</Benchmark>
"#;

/// A small checklist of the kind shipped inside nested archives
pub const NESTED_BENCHMARK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Benchmark id="Cisco_Router_NDM">
  <status date="2020-01-24">accepted</status>
  <title>Cisco IOS Router NDM Security Technical Implementation Guide</title>
  <plain-text id="release-info">Release: 1 Benchmark Date: 24 Jan 2020</plain-text>
  <version>1</version>
  <Group id="V-2001">
    <title>SRG-APP-000065-NDM-000214</title>
    <Rule id="SV-2001r1_rule" severity="medium">
      <title>The router must enforce login attempt limits.</title>
      <description>&lt;VulnDiscussion&gt;Limits stop brute force attacks.&lt;/VulnDiscussion&gt;</description>
      <fixtext fixref="F-2001r1_fix">Configure login block-for.</fixtext>
    </Rule>
  </Group>
</Benchmark>
"#;

pub const GROUP_COUNT: usize = 4;

/// Build an in-memory ZIP archive from `(entry name, contents)` pairs.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start zip entry");
        writer.write_all(contents).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// Archive carrying the checklist directly
pub fn direct_archive(document: &str) -> Vec<u8> {
    zip_bytes(&[
        ("U_Sample_STIG/U_Sample_V2R4_Readme.txt", b"readme"),
        (
            "U_Sample_STIG/U_Sample_STIG_V2R4_Manual-xccdf.xml",
            document.as_bytes(),
        ),
    ])
}

/// Archive wrapping the checklist in an inner ZIP
pub fn nested_archive(document: &str) -> Vec<u8> {
    let inner = zip_bytes(&[(
        "U_Cisco_IOS_Router_NDM_STIG_V1R1_Manual-xccdf.xml",
        document.as_bytes(),
    )]);
    zip_bytes(&[
        ("U_Cisco_IOS_Router_Overview.pdf", b"%PDF"),
        ("U_Cisco_IOS_Router_NDM_V1R1_STIG.zip", &inner),
    ])
}

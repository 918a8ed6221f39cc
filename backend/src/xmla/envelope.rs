//! SOAP envelope for the XMLA `Execute` method.

use quick_xml::escape::escape;

pub const SOAP_ACTION: &str = "urn:schemas-microsoft-com:xml-analysis:Execute";

/// Build an `Execute` request for `statement` against `catalog`.
///
/// The statement goes in a CDATA section; a literal `]]>` inside it is
/// split across two sections.
pub fn execute_envelope(statement: &str, catalog: &str) -> String {
    let statement = statement.replace("]]>", "]]]]><![CDATA[>");
    let catalog = escape(catalog);
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <Execute xmlns="urn:schemas-microsoft-com:xml-analysis">
      <Command>
        <Statement><![CDATA[{statement}]]></Statement>
      </Command>
      <Properties>
        <PropertyList>
          <Catalog>{catalog}</Catalog>
          <Format>Multidimensional</Format>
          <AxisFormat>TupleFormat</AxisFormat>
        </PropertyList>
      </Properties>
    </Execute>
  </soap:Body>
</soap:Envelope>"#
    )
}

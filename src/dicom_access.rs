use dicom::core::value::PrimitiveValue;
use dicom::core::{DataElement, Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{DefaultDicomObject, InMemDicomObject};

/// Patient attributes touched by de-identification.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PatientField {
    Name,
    Id,
    BirthDate,
    Sex,
    Age,
}

impl PatientField {
    pub const ALL: [PatientField; 5] = [
        PatientField::Name,
        PatientField::Id,
        PatientField::BirthDate,
        PatientField::Sex,
        PatientField::Age,
    ];

    pub fn tag(self) -> Tag {
        match self {
            PatientField::Name => Tag(0x0010, 0x0010),
            PatientField::Id => Tag(0x0010, 0x0020),
            PatientField::BirthDate => Tag(0x0010, 0x0030),
            PatientField::Sex => Tag(0x0010, 0x0040),
            PatientField::Age => Tag(0x0010, 0x1010),
        }
    }

    pub fn vr(self) -> VR {
        match self {
            PatientField::Name => VR::PN,
            PatientField::Id => VR::LO,
            PatientField::BirthDate => VR::DA,
            PatientField::Sex => VR::CS,
            PatientField::Age => VR::AS,
        }
    }
}

/// Read/write access to the patient fields of any record shape.
pub trait PatientRecord {
    fn read_field(&self, field: PatientField) -> Option<String>;
    fn write_field(&mut self, field: PatientField, value: &str);

    fn clear_field(&mut self, field: PatientField) {
        self.write_field(field, "");
    }
}

impl PatientRecord for InMemDicomObject<StandardDataDictionary> {
    fn read_field(&self, field: PatientField) -> Option<String> {
        self.element(field.tag())
            .ok()
            .and_then(|e| e.to_str().ok())
            // Even-length padding may leave a trailing space or NUL.
            .map(|s| s.trim_end_matches(|c: char| c == ' ' || c == '\0').to_string())
    }

    fn write_field(&mut self, field: PatientField, value: &str) {
        self.put(DataElement::new(
            field.tag(),
            field.vr(),
            PrimitiveValue::from(value),
        ));
    }
}

impl PatientRecord for DefaultDicomObject {
    fn read_field(&self, field: PatientField) -> Option<String> {
        PatientRecord::read_field(&**self, field)
    }

    fn write_field(&mut self, field: PatientField, value: &str) {
        PatientRecord::write_field(&mut **self, field, value)
    }
}

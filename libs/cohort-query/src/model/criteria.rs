use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

wire_enum! {
    /// Clinical domain of a criterion.
    Domain {
        Condition => "CONDITION",
        Procedure => "PROCEDURE",
        Observation => "OBSERVATION",
        Measurement => "MEASUREMENT",
        Drug => "DRUG",
        PhysicalMeasurement => "PHYSICAL_MEASUREMENT",
        Survey => "SURVEY",
        Person => "PERSON",
        Visit => "VISIT",
    }
}

wire_enum! {
    /// Vocabulary or demographic kind of a search parameter.
    CriteriaType {
        Icd9Cm => "ICD9CM",
        Icd9Proc => "ICD9PROC",
        Icd10Cm => "ICD10CM",
        Icd10Pcs => "ICD10PCS",
        Cpt4 => "CPT4",
        Snomed => "SNOMED",
        Loinc => "LOINC",
        Atc => "ATC",
        RxNorm => "RXNORM",
        Ppi => "PPI",
        Visit => "VISIT",
        Age => "AGE",
        Gender => "GENDER",
        Race => "RACE",
        Ethnicity => "ETHNICITY",
        Sex => "SEX",
        Deceased => "DECEASED",
    }
}

wire_enum! {
    CriteriaSubType {
        Survey => "SURVEY",
        Question => "QUESTION",
        Answer => "ANSWER",
        Bp => "BP",
        Hr => "HR",
        Height => "HEIGHT",
        Weight => "WEIGHT",
        Bmi => "BMI",
        Wc => "WC",
        Hc => "HC",
        Preg => "PREG",
        Wheel => "WHEEL",
    }
}

wire_enum! {
    Operator {
        Equal => "EQUAL",
        NotEqual => "NOT_EQUAL",
        LessThan => "LESS_THAN",
        GreaterThan => "GREATER_THAN",
        LessThanOrEqualTo => "LESS_THAN_OR_EQUAL_TO",
        GreaterThanOrEqualTo => "GREATER_THAN_OR_EQUAL_TO",
        Like => "LIKE",
        In => "IN",
        NotIn => "NOT_IN",
        Between => "BETWEEN",
    }
}

impl Operator {
    /// SQL spelling of the operator.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::GreaterThan => ">",
            Self::LessThanOrEqualTo => "<=",
            Self::GreaterThanOrEqualTo => ">=",
            Self::Like => "LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Between => "BETWEEN",
        }
    }
}

wire_enum! {
    AttrName {
        Any => "ANY",
        Num => "NUM",
        Cat => "CAT",
        Age => "AGE",
        AgeAtConsent => "AGE_AT_CONSENT",
        AgeAtCdr => "AGE_AT_CDR",
        SurveyVersionConceptId => "SURVEY_VERSION_CONCEPT_ID",
    }
}

wire_enum! {
    ModifierType {
        AgeAtEvent => "AGE_AT_EVENT",
        EventDate => "EVENT_DATE",
        Encounters => "ENCOUNTERS",
        NumOfOccurrences => "NUM_OF_OCCURRENCES",
    }
}

wire_enum! {
    /// Which occurrence of side A a temporal group correlates.
    TemporalMention {
        AnyMention => "ANY_MENTION",
        FirstMention => "FIRST_MENTION",
        LastMention => "LAST_MENTION",
    }
}

wire_enum! {
    TemporalTime {
        DuringSameEncounterAs => "DURING_SAME_ENCOUNTER_AS",
        XDaysBefore => "X_DAYS_BEFORE",
        XDaysAfter => "X_DAYS_AFTER",
        WithinXDaysOf => "WITHIN_X_DAYS_OF",
    }
}

impl TemporalTime {
    /// Whether the relationship is measured in days and needs a `timeValue`.
    pub fn is_day_offset(&self) -> bool {
        !matches!(self, Self::DuringSameEncounterAs)
    }
}

wire_enum! {
    /// Column charted as the `name` dimension of demographic charts.
    GenderOrSexType {
        Gender => "GENDER",
        SexAtBirth => "SEX_AT_BIRTH",
    }
}

impl GenderOrSexType {
    pub fn column(&self) -> &'static str {
        match self {
            Self::Gender => "gender",
            Self::SexAtBirth => "sex_at_birth",
        }
    }
}

wire_enum! {
    /// Age used for demographic chart age ranges.
    AgeType {
        Age => "AGE",
        AgeAtConsent => "AGE_AT_CONSENT",
        AgeAtCdr => "AGE_AT_CDR",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub name: AttrName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    #[serde(default)]
    pub operands: Vec<String>,
    /// Set on the systolic/diastolic halves of a blood-pressure parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept_id: Option<i64>,
}

/// One selected criterion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParameter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_id: Option<String>,
    pub domain: Domain,
    #[serde(rename = "type")]
    pub criteria_type: CriteriaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<CriteriaSubType>,
    /// Hierarchy node (matches descendants) rather than a selectable leaf.
    #[serde(default)]
    pub group: bool,
    #[serde(default)]
    pub standard: bool,
    #[serde(default)]
    pub ancestor_data: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modifier {
    pub name: ModifierType,
    pub operator: Operator,
    #[serde(default)]
    pub operands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchGroupItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub domain: Domain,
    #[serde(default)]
    pub search_parameters: Vec<SearchParameter>,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_group: Option<i32>,
}

/// Items OR-ed together, optionally correlated in time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub items: Vec<SearchGroupItem>,
    #[serde(default)]
    pub temporal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mention: Option<TemporalMention>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<TemporalTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_value: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default)]
    pub includes: Vec<SearchGroup>,
    #[serde(default)]
    pub excludes: Vec<SearchGroup>,
    /// Person-level flag columns (e.g. `has_ehr_data`) that must equal 1.
    #[serde(default)]
    pub data_filters: Vec<String>,
}

/// Who is in the cohort: a criteria tree (minus explicit exclusions) or an
/// explicit participant list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParticipantCriteria {
    #[serde(rename_all = "camelCase")]
    Search {
        request: SearchRequest,
        #[serde(default)]
        exclude_ids: BTreeSet<i64>,
    },
    #[serde(rename_all = "camelCase")]
    Participants { ids: BTreeSet<i64> },
}

impl ParticipantCriteria {
    pub fn search(request: SearchRequest) -> Self {
        Self::Search {
            request,
            exclude_ids: BTreeSet::new(),
        }
    }

    pub fn participants(ids: impl IntoIterator<Item = i64>) -> Self {
        Self::Participants {
            ids: ids.into_iter().collect(),
        }
    }
}

impl From<SearchRequest> for ParticipantCriteria {
    fn from(request: SearchRequest) -> Self {
        Self::search(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_camel_case_request() {
        let json = r#"{
            "includes": [{
                "id": "g1",
                "temporal": true,
                "mention": "FIRST_MENTION",
                "time": "X_DAYS_BEFORE",
                "timeValue": 5,
                "items": [{
                    "type": "CONDITION",
                    "temporalGroup": 0,
                    "searchParameters": [{
                        "domain": "CONDITION",
                        "type": "ICD9CM",
                        "group": true,
                        "conceptId": 192819,
                        "value": "001"
                    }],
                    "modifiers": [{"name": "AGE_AT_EVENT", "operator": "GREATER_THAN", "operands": ["18"]}]
                }]
            }],
            "dataFilters": ["has_ehr_data"]
        }"#;
        let request: SearchRequest = serde_json::from_str(json).unwrap();
        let group = &request.includes[0];
        assert_eq!(group.time, Some(TemporalTime::XDaysBefore));
        assert_eq!(group.time_value, Some(5));
        let item = &group.items[0];
        assert_eq!(item.domain, Domain::Condition);
        assert_eq!(item.temporal_group, Some(0));
        let param = &item.search_parameters[0];
        assert_eq!(param.criteria_type, CriteriaType::Icd9Cm);
        assert!(param.group);
        assert!(!param.standard);
        assert_eq!(item.modifiers[0].name, ModifierType::AgeAtEvent);
        assert!(request.excludes.is_empty());
        assert_eq!(request.data_filters, vec!["has_ehr_data"]);
    }

    #[test]
    fn participant_criteria_variants_are_tagged() {
        let criteria: ParticipantCriteria =
            serde_json::from_str(r#"{"participants": {"ids": [3, 1, 2, 1]}}"#).unwrap();
        assert_eq!(criteria, ParticipantCriteria::participants([1, 2, 3]));

        let criteria: ParticipantCriteria =
            serde_json::from_str(r#"{"search": {"request": {"includes": []}, "excludeIds": [7]}}"#)
                .unwrap();
        match criteria {
            ParticipantCriteria::Search { exclude_ids, .. } => {
                assert_eq!(exclude_ids.into_iter().collect::<Vec<_>>(), vec![7])
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn day_offset_kinds() {
        assert!(!TemporalTime::DuringSameEncounterAs.is_day_offset());
        assert!(TemporalTime::WithinXDaysOf.is_day_offset());
    }
}

use serde::{Deserialize, Serialize};
use serde_json::json;

pub const ENTITY_TYPE_VARIANTS: [&str; 10] = [
    "Person",
    "Organization",
    "Location",
    "Product",
    "Event",
    "Concept",
    "Technology",
    "Document",
    "Date / Period",
    "Other",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub entity_name: String,
    pub entity_type: String,
    pub entity_description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub source_entity: String,
    pub target_entity: String,
    pub relationship_keywords: Vec<String>,
    pub relationship_description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitiesRelationships {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentEnrichment {
    pub summary: String,
    pub keywords: Vec<String>,
    pub hashtags: Vec<String>,
}

pub fn entities_relationships_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "entity_name": {
                            "type": "string",
                            "description": "The name of the entity. Capitalize the first letter of each significant word (title case). Ensure **consistent naming** across the entire extraction process."
                        },
                        "entity_type": {
                            "type": "string",
                            "enum": ENTITY_TYPE_VARIANTS.iter().copied().collect::<Vec<_>>(),
                            "description": "Categorize the entity using the controlled vocabulary only. If none applies, classify it as `Other`."
                        },
                        "entity_description": {
                            "type": "string",
                            "description": "A concise description of the entity's attributes and activities, based *solely* on the information present in the input text."
                        }
                    },
                    "required": ["entity_name", "entity_type", "entity_description"]
                }
            },
            "relationships": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "source_entity": {
                            "type": "string",
                            "description": "The name of the source entity. Ensure **consistent naming** with entity extraction."
                        },
                        "target_entity": {
                            "type": "string",
                            "description": "The name of the target entity. Ensure **consistent naming** with entity extraction."
                        },
                        "relationship_keywords": {
                            "type": "array",
                            "items": {
                                "type": "string",
                                "description": "High-level keywords summarizing the overarching nature of the relationship."
                            }
                        },
                        "relationship_description": {
                            "type": "string",
                            "description": "A concise explanation of the relationship between the source and target entities."
                        }
                    },
                    "required": ["source_entity", "target_entity", "relationship_keywords", "relationship_description"]
                }
            }
        },
        "required": ["entities", "relationships"]
    })
}

pub fn document_enrichment_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "summary": {
                "type": "string",
                "description": "Three sentences at most, covering what the document is about and who it concerns."
            },
            "keywords": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Up to ten topical keywords, lowercase."
            },
            "hashtags": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Up to five hashtags, each starting with '#'."
            }
        },
        "required": ["summary", "keywords", "hashtags"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_schema_embeds_controlled_vocabulary() {
        let schema = entities_relationships_schema();
        let variants = schema["properties"]["entities"]["items"]["properties"]["entity_type"]
            ["enum"]
            .as_array()
            .unwrap();
        assert_eq!(variants.len(), ENTITY_TYPE_VARIANTS.len());
        assert!(variants.iter().any(|v| v == "Other"));
    }
}

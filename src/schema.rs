// 📐 Shape Layer - Canonical schema + column resolution
// Maps version-drifted CSV headers onto the fixed logical columns we persist

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// ENTITY + FIELD TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    /// Active-provider registry (dimension)
    Provider,
    /// Quarterly financial statements (fact)
    FinancialFact,
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Provider => "Provider",
            EntityKind::FinancialFact => "FinancialFact",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Logical field names, independent of how any given export labels them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CanonicalField {
    // shared
    RegistroAns,
    // financial statements
    CdContaContabil,
    Descricao,
    Valor,
    Ano,
    Trimestre,
    Data,
    // provider registry
    Cnpj,
    RazaoSocial,
    NomeFantasia,
    Modalidade,
    Logradouro,
    Numero,
    Complemento,
    Bairro,
    Cidade,
    Uf,
    Cep,
    Ddd,
    Telefone,
    Fax,
    Email,
    Representante,
    CargoRepresentante,
    DataRegistro,
    DataAtualizacao,
}

impl CanonicalField {
    /// Column name in the relational store
    pub fn column(&self) -> &'static str {
        match self {
            CanonicalField::RegistroAns => "registro_ans",
            CanonicalField::CdContaContabil => "cd_conta_contabil",
            CanonicalField::Descricao => "descricao",
            CanonicalField::Valor => "valor",
            CanonicalField::Ano => "ano",
            CanonicalField::Trimestre => "trimestre",
            CanonicalField::Data => "data",
            CanonicalField::Cnpj => "cnpj",
            CanonicalField::RazaoSocial => "razao_social",
            CanonicalField::NomeFantasia => "nome_fantasia",
            CanonicalField::Modalidade => "modalidade",
            CanonicalField::Logradouro => "logradouro",
            CanonicalField::Numero => "numero",
            CanonicalField::Complemento => "complemento",
            CanonicalField::Bairro => "bairro",
            CanonicalField::Cidade => "cidade",
            CanonicalField::Uf => "uf",
            CanonicalField::Cep => "cep",
            CanonicalField::Ddd => "ddd",
            CanonicalField::Telefone => "telefone",
            CanonicalField::Fax => "fax",
            CanonicalField::Email => "email",
            CanonicalField::Representante => "representante",
            CanonicalField::CargoRepresentante => "cargo_representante",
            CanonicalField::DataRegistro => "data_registro",
            CanonicalField::DataAtualizacao => "data_atualizacao_dados",
        }
    }
}

// ============================================================================
// HEADER PREDICATES (rules as data)
// ============================================================================

/// One way a normalized header can satisfy a canonical field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderRule {
    /// Header contains every `all` substring and none of the `none` substrings
    Contains {
        all: &'static [&'static str],
        none: &'static [&'static str],
    },
    /// Header equals this name exactly (after normalization)
    Equals(&'static str),
}

impl HeaderRule {
    pub fn matches(&self, normalized_header: &str) -> bool {
        match self {
            HeaderRule::Contains { all, none } => {
                all.iter().all(|k| normalized_header.contains(k))
                    && !none.iter().any(|k| normalized_header.contains(k))
            }
            HeaderRule::Equals(name) => normalized_header == *name,
        }
    }
}

const fn contains(all: &'static [&'static str]) -> HeaderRule {
    HeaderRule::Contains { all, none: &[] }
}

const fn contains_except(all: &'static [&'static str], none: &'static [&'static str]) -> HeaderRule {
    HeaderRule::Contains { all, none }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub field: CanonicalField,
    pub required: bool,
    /// Evaluated in declared order; the first rule any header satisfies decides
    pub rules: &'static [HeaderRule],
}

const REGISTRO_ANS_RULES: &[HeaderRule] = &[
    contains_except(&["registro", "ans"], &["data"]),
    contains(&["reg_ans"]),
    HeaderRule::Equals("ans"),
];

const FINANCIAL_FACT_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        field: CanonicalField::RegistroAns,
        required: true,
        rules: REGISTRO_ANS_RULES,
    },
    FieldSpec {
        field: CanonicalField::CdContaContabil,
        required: true,
        rules: &[
            contains(&["cd_conta"]),
            contains(&["codigo", "conta"]),
            contains(&["cod_conta"]),
            contains_except(&["conta"], &["descri", "nome", "saldo"]),
            HeaderRule::Equals("codigo"),
        ],
    },
    FieldSpec {
        field: CanonicalField::Descricao,
        required: true,
        rules: &[contains(&["descri"]), contains(&["nome_conta"])],
    },
    FieldSpec {
        field: CanonicalField::Valor,
        required: true,
        rules: &[
            contains(&["saldo", "final"]),
            contains(&["saldo", "atual"]),
            contains(&["saldo"]),
            contains(&["valor"]),
        ],
    },
    FieldSpec {
        field: CanonicalField::Ano,
        required: false,
        rules: &[
            HeaderRule::Equals("ano"),
            HeaderRule::Equals("year"),
            HeaderRule::Equals("nu_ano"),
        ],
    },
    FieldSpec {
        field: CanonicalField::Trimestre,
        required: false,
        rules: &[contains(&["trimestre"]), HeaderRule::Equals("quarter")],
    },
    FieldSpec {
        field: CanonicalField::Data,
        required: false,
        rules: &[
            HeaderRule::Equals("data"),
            contains(&["data", "competencia"]),
        ],
    },
];

const PROVIDER_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        field: CanonicalField::RegistroAns,
        required: true,
        rules: REGISTRO_ANS_RULES,
    },
    FieldSpec {
        field: CanonicalField::Cnpj,
        required: false,
        rules: &[contains(&["cnpj"])],
    },
    FieldSpec {
        field: CanonicalField::RazaoSocial,
        required: false,
        rules: &[contains(&["razao", "social"]), contains(&["razao"])],
    },
    FieldSpec {
        field: CanonicalField::NomeFantasia,
        required: false,
        rules: &[contains(&["fantasia"])],
    },
    FieldSpec {
        field: CanonicalField::Modalidade,
        required: false,
        rules: &[contains(&["modalidade"])],
    },
    FieldSpec {
        field: CanonicalField::Logradouro,
        required: false,
        rules: &[
            contains(&["logradouro"]),
            contains_except(&["endereco"], &["eletronico"]),
        ],
    },
    FieldSpec {
        field: CanonicalField::Numero,
        required: false,
        rules: &[contains_except(&["numero"], &["telefone", "fax"])],
    },
    FieldSpec {
        field: CanonicalField::Complemento,
        required: false,
        rules: &[contains(&["complemento"])],
    },
    FieldSpec {
        field: CanonicalField::Bairro,
        required: false,
        rules: &[contains(&["bairro"])],
    },
    FieldSpec {
        field: CanonicalField::Cidade,
        required: false,
        rules: &[contains(&["cidade"]), contains(&["municipio"])],
    },
    FieldSpec {
        field: CanonicalField::Uf,
        required: false,
        rules: &[
            HeaderRule::Equals("uf"),
            HeaderRule::Equals("sigla_uf"),
            contains(&["estado"]),
        ],
    },
    FieldSpec {
        field: CanonicalField::Cep,
        required: false,
        rules: &[contains(&["cep"])],
    },
    FieldSpec {
        field: CanonicalField::Ddd,
        required: false,
        rules: &[contains(&["ddd"])],
    },
    FieldSpec {
        field: CanonicalField::Telefone,
        required: false,
        rules: &[contains(&["telefone"]), contains_except(&["fone"], &["fax"])],
    },
    FieldSpec {
        field: CanonicalField::Fax,
        required: false,
        rules: &[contains(&["fax"])],
    },
    FieldSpec {
        field: CanonicalField::Email,
        required: false,
        rules: &[
            contains(&["email"]),
            contains(&["e-mail"]),
            contains(&["e_mail"]),
            contains(&["eletronico"]),
        ],
    },
    FieldSpec {
        field: CanonicalField::Representante,
        required: false,
        rules: &[contains_except(&["representante"], &["cargo"])],
    },
    FieldSpec {
        field: CanonicalField::CargoRepresentante,
        required: false,
        rules: &[contains(&["cargo"])],
    },
    FieldSpec {
        field: CanonicalField::DataRegistro,
        required: false,
        rules: &[contains(&["data", "registro"])],
    },
    FieldSpec {
        field: CanonicalField::DataAtualizacao,
        required: false,
        rules: &[contains(&["data", "atualiza"])],
    },
];

// ============================================================================
// CANONICAL SCHEMA
// ============================================================================

/// The fixed target column set for one entity type
#[derive(Debug, Clone, Copy)]
pub struct CanonicalSchema {
    pub entity: EntityKind,
    pub fields: &'static [FieldSpec],
}

impl CanonicalSchema {
    pub fn for_entity(entity: EntityKind) -> Self {
        let fields = match entity {
            EntityKind::Provider => PROVIDER_FIELDS,
            EntityKind::FinancialFact => FINANCIAL_FACT_FIELDS,
        };
        CanonicalSchema { entity, fields }
    }

    pub fn spec(&self, field: CanonicalField) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|s| s.field == field)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = CanonicalField> + '_ {
        self.fields.iter().filter(|s| s.required).map(|s| s.field)
    }

    /// Literal header to read for one canonical field, or None if unresolved
    pub fn resolve_field<'h>(&self, headers: &'h [String], field: CanonicalField) -> Option<&'h str> {
        let spec = self.spec(field)?;
        resolve_column(headers, spec.rules).map(|col| headers[col.index].as_str())
    }

    /// Resolve every field; reject the file if a required one is missing
    pub fn resolve(&self, headers: &[String]) -> Result<ResolvedSchema, IngestError> {
        let mut columns = BTreeMap::new();
        for spec in self.fields {
            if let Some(col) = resolve_column(headers, spec.rules) {
                columns.insert(spec.field, col);
            }
        }

        let missing: Vec<String> = self
            .required_fields()
            .filter(|field| !columns.contains_key(field))
            .map(|field| field.column().to_string())
            .collect();

        if !missing.is_empty() {
            return Err(IngestError::MissingRequiredColumns {
                entity: self.entity,
                missing_fields: missing,
            });
        }

        Ok(ResolvedSchema {
            entity: self.entity,
            columns,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedColumn {
    pub index: usize,
    pub header: String,
}

/// Canonical field -> physical column of one concrete file
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedSchema {
    pub entity: EntityKind,
    pub columns: BTreeMap<CanonicalField, ResolvedColumn>,
}

impl ResolvedSchema {
    pub fn has(&self, field: CanonicalField) -> bool {
        self.columns.contains_key(&field)
    }

    pub fn header(&self, field: CanonicalField) -> Option<&str> {
        self.columns.get(&field).map(|c| c.header.as_str())
    }

    /// Trimmed cell for a field; None if the column is unresolved, the row
    /// is short, or the cell is blank
    pub fn value<'r>(&self, record: &'r csv::StringRecord, field: CanonicalField) -> Option<&'r str> {
        let col = self.columns.get(&field)?;
        record
            .get(col.index)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Pure resolution step: first rule wins; among headers matching the same
/// rule the shortest normalized name wins, then lexicographic order, so the
/// answer does not depend on the order of the header row.
pub fn resolve_column(headers: &[String], rules: &[HeaderRule]) -> Option<ResolvedColumn> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();

    for rule in rules {
        let best = normalized
            .iter()
            .enumerate()
            .filter(|(_, h)| rule.matches(h))
            .min_by(|(ia, a), (ib, b)| {
                a.len()
                    .cmp(&b.len())
                    .then_with(|| a.cmp(b))
                    .then_with(|| ia.cmp(ib))
            });

        if let Some((index, _)) = best {
            return Some(ResolvedColumn {
                index,
                header: headers[index].clone(),
            });
        }
    }

    None
}

// ============================================================================
// TEXT NORMALIZATION
// ============================================================================

/// Lowercase, trim, drop a stray BOM, fold accents and join words with '_'
pub fn normalize_header(header: &str) -> String {
    let folded = fold_text(header.trim_start_matches('\u{feff}').trim());
    folded.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Lowercase and strip Portuguese diacritics ("ASSISTÊNCIA" -> "assistencia")
pub fn fold_text(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        // decomposed input: drop the combining marks
        .filter(|c| !('\u{300}'..='\u{36f}').contains(c))
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_header_folds_accents_and_spaces() {
        assert_eq!(normalize_header("Razão Social"), "razao_social");
        assert_eq!(normalize_header("\u{feff}REG_ANS "), "reg_ans");
        assert_eq!(normalize_header("Endereço  eletrônico"), "endereco_eletronico");
    }

    #[test]
    fn test_fold_text_drops_combining_marks() {
        assert_eq!(fold_text("ME\u{301}DICO"), "medico");
        assert_eq!(fold_text("ASSISTE\u{302}NCIA"), "assistencia");
        assert_eq!(normalize_header("Raza\u{303}o Social"), "razao_social");
    }

    #[test]
    fn test_current_statement_headers_resolve() {
        let schema = CanonicalSchema::for_entity(EntityKind::FinancialFact);
        let hdrs = headers(&[
            "DATA",
            "REG_ANS",
            "CD_CONTA_CONTABIL",
            "DESCRICAO",
            "VL_SALDO_INICIAL",
            "VL_SALDO_FINAL",
        ]);

        let resolved = schema.resolve(&hdrs).unwrap();

        assert_eq!(resolved.header(CanonicalField::RegistroAns), Some("REG_ANS"));
        assert_eq!(resolved.header(CanonicalField::CdContaContabil), Some("CD_CONTA_CONTABIL"));
        assert_eq!(resolved.header(CanonicalField::Descricao), Some("DESCRICAO"));
        // "saldo"+"final" is declared before bare "saldo"
        assert_eq!(resolved.header(CanonicalField::Valor), Some("VL_SALDO_FINAL"));
        assert_eq!(resolved.header(CanonicalField::Data), Some("DATA"));
        assert!(!resolved.has(CanonicalField::Ano));
    }

    #[test]
    fn test_older_statement_headers_resolve() {
        let schema = CanonicalSchema::for_entity(EntityKind::FinancialFact);
        let hdrs = headers(&["Registro ANS", "Código Conta", "Descrição", "Valor"]);

        assert_eq!(schema.resolve_field(&hdrs, CanonicalField::RegistroAns), Some("Registro ANS"));
        assert_eq!(schema.resolve_field(&hdrs, CanonicalField::CdContaContabil), Some("Código Conta"));
        assert_eq!(schema.resolve_field(&hdrs, CanonicalField::Descricao), Some("Descrição"));
        assert_eq!(schema.resolve_field(&hdrs, CanonicalField::Valor), Some("Valor"));
    }

    #[test]
    fn test_resolution_independent_of_header_order() {
        let schema = CanonicalSchema::for_entity(EntityKind::Provider);
        let a = headers(&["Data_Registro_ANS", "Registro_ANS", "Razao_Social", "Cargo_Representante", "Representante"]);
        let mut b = a.clone();
        b.reverse();
        let c = headers(&["Representante", "Registro_ANS", "Cargo_Representante", "Razao_Social", "Data_Registro_ANS"]);

        for field in [
            CanonicalField::RegistroAns,
            CanonicalField::RazaoSocial,
            CanonicalField::Representante,
            CanonicalField::CargoRepresentante,
            CanonicalField::DataRegistro,
        ] {
            let ra = schema.resolve_field(&a, field);
            assert!(ra.is_some(), "{:?} should resolve", field);
            assert_eq!(ra, schema.resolve_field(&b, field));
            assert_eq!(ra, schema.resolve_field(&c, field));
        }

        assert_eq!(schema.resolve_field(&a, CanonicalField::RegistroAns), Some("Registro_ANS"));
        assert_eq!(schema.resolve_field(&a, CanonicalField::DataRegistro), Some("Data_Registro_ANS"));
        assert_eq!(schema.resolve_field(&a, CanonicalField::Representante), Some("Representante"));
    }

    #[test]
    fn test_tie_on_same_rule_prefers_shortest_header() {
        let rules = &[contains(&["saldo"])];
        let a = headers(&["VL_SALDO_INICIAL_AJUSTADO", "VL_SALDO"]);
        let b = headers(&["VL_SALDO", "VL_SALDO_INICIAL_AJUSTADO"]);

        assert_eq!(resolve_column(&a, rules).unwrap().header, "VL_SALDO");
        assert_eq!(resolve_column(&b, rules).unwrap().header, "VL_SALDO");
    }

    #[test]
    fn test_missing_value_column_rejects_file() {
        let schema = CanonicalSchema::for_entity(EntityKind::FinancialFact);
        let hdrs = headers(&["REG_ANS", "CD_CONTA_CONTABIL", "DESCRICAO", "OBSERVACAO"]);

        match schema.resolve(&hdrs) {
            Err(IngestError::MissingRequiredColumns { entity, missing_fields }) => {
                assert_eq!(entity, EntityKind::FinancialFact);
                assert_eq!(missing_fields, vec!["valor".to_string()]);
            }
            other => panic!("expected MissingRequiredColumns, got {:?}", other),
        }

        let required: Vec<&str> = schema.required_fields().map(|f| f.column()).collect();
        assert_eq!(required, vec!["registro_ans", "cd_conta_contabil", "descricao", "valor"]);
    }

    #[test]
    fn test_provider_registry_headers_resolve() {
        let schema = CanonicalSchema::for_entity(EntityKind::Provider);
        let hdrs = headers(&[
            "Registro_ANS",
            "CNPJ",
            "Razao_Social",
            "Nome_Fantasia",
            "Modalidade",
            "Logradouro",
            "Numero",
            "Complemento",
            "Bairro",
            "Cidade",
            "UF",
            "CEP",
            "DDD",
            "Telefone",
            "Fax",
            "Endereco_eletronico",
            "Representante",
            "Cargo_Representante",
            "Regiao_de_Comercializacao",
            "Data_Registro_ANS",
        ]);

        let resolved = schema.resolve(&hdrs).unwrap();

        assert_eq!(resolved.header(CanonicalField::Uf), Some("UF"));
        assert_eq!(resolved.header(CanonicalField::Email), Some("Endereco_eletronico"));
        assert_eq!(resolved.header(CanonicalField::Logradouro), Some("Logradouro"));
        assert_eq!(resolved.header(CanonicalField::Telefone), Some("Telefone"));
        assert!(!resolved.has(CanonicalField::DataAtualizacao));
    }

    #[test]
    fn test_value_skips_blank_and_short_rows() {
        let schema = CanonicalSchema::for_entity(EntityKind::FinancialFact);
        let resolved = schema
            .resolve(&headers(&["REG_ANS", "CD_CONTA_CONTABIL", "DESCRICAO", "VL_SALDO_FINAL"]))
            .unwrap();

        let full = csv::StringRecord::from(vec![" 123456 ", "411", "EVENTOS", "10,00"]);
        let short = csv::StringRecord::from(vec!["123456", "  "]);

        assert_eq!(resolved.value(&full, CanonicalField::RegistroAns), Some("123456"));
        assert_eq!(resolved.value(&short, CanonicalField::CdContaContabil), None);
        assert_eq!(resolved.value(&short, CanonicalField::Valor), None);
    }
}

// 🏥 Provider Entity - registry identifier + registry attributes
//
// Identity: registro_ans (never changes, unique in the store)
// Values: everything else, taken from whichever registry file was seen first

use crate::schema::{CanonicalField, ResolvedSchema};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Provider {
    // ========================================================================
    // IDENTITY
    // ========================================================================
    pub registro_ans: String,

    // ========================================================================
    // REGISTRY ATTRIBUTES
    // ========================================================================
    pub cnpj: Option<String>,
    pub razao_social: Option<String>,
    pub nome_fantasia: Option<String>,
    pub modalidade: Option<String>,

    // address
    pub logradouro: Option<String>,
    pub numero: Option<String>,
    pub complemento: Option<String>,
    pub bairro: Option<String>,
    pub cidade: Option<String>,
    pub uf: Option<String>,
    pub cep: Option<String>,

    // contact
    pub ddd: Option<String>,
    pub telefone: Option<String>,
    pub fax: Option<String>,
    pub email: Option<String>,
    pub representante: Option<String>,
    pub cargo_representante: Option<String>,

    /// ISO date when the source value parses, raw text otherwise
    pub data_registro: Option<String>,
    pub data_atualizacao_dados: Option<String>,
}

impl Provider {
    pub fn new(registro_ans: impl Into<String>) -> Self {
        Provider {
            registro_ans: registro_ans.into(),
            ..Default::default()
        }
    }

    /// Builder pattern: add legal name
    pub fn with_razao_social(mut self, razao_social: impl Into<String>) -> Self {
        self.razao_social = Some(razao_social.into());
        self
    }

    /// Map one registry row through its resolved schema.
    /// The identifier may come back empty; the store rejects such rows.
    pub fn from_record(schema: &ResolvedSchema, record: &csv::StringRecord) -> Self {
        let get = |field| schema.value(record, field).map(str::to_string);

        Provider {
            registro_ans: get(CanonicalField::RegistroAns).unwrap_or_default(),
            cnpj: get(CanonicalField::Cnpj),
            razao_social: get(CanonicalField::RazaoSocial),
            nome_fantasia: get(CanonicalField::NomeFantasia),
            modalidade: get(CanonicalField::Modalidade),
            logradouro: get(CanonicalField::Logradouro),
            numero: get(CanonicalField::Numero),
            complemento: get(CanonicalField::Complemento),
            bairro: get(CanonicalField::Bairro),
            cidade: get(CanonicalField::Cidade),
            uf: get(CanonicalField::Uf),
            cep: get(CanonicalField::Cep),
            ddd: get(CanonicalField::Ddd),
            telefone: get(CanonicalField::Telefone),
            fax: get(CanonicalField::Fax),
            email: get(CanonicalField::Email),
            representante: get(CanonicalField::Representante),
            cargo_representante: get(CanonicalField::CargoRepresentante),
            data_registro: get(CanonicalField::DataRegistro).map(|d| normalize_date(&d)),
            data_atualizacao_dados: get(CanonicalField::DataAtualizacao).map(|d| normalize_date(&d)),
        }
    }

    /// Display name: legal name, then trade name
    pub fn display_name(&self) -> Option<&str> {
        self.razao_social
            .as_deref()
            .or(self.nome_fantasia.as_deref())
    }
}

/// "15/03/1999" -> "1999-03-15"; unknown formats are kept verbatim
fn normalize_date(raw: &str) -> String {
    ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| raw.to_string())
}

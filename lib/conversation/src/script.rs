//! The intake script: what the agent offers, asks and answers.

use crate::tracker::BoardRoute;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default company name used in the greeting.
pub const DEFAULT_COMPANY_NAME: &str = "GeoView";

/// Default minimum length of a submitted form, in characters, after trimming.
pub const DEFAULT_MIN_FORM_LENGTH: usize = 60;

const DEFAULT_GROUP: &str = "novo_grupo";
const TOPICS_GROUP: &str = "topics";

/// Selectable services with their tracker boards, in menu order.
const DEFAULT_OPTIONS: &[(&str, u64, &str)] = &[
    ("GPR", 891_902_277, DEFAULT_GROUP),
    ("Locação GPR_IE", 1_531_023_227, DEFAULT_GROUP),
    ("Geoelétrica", 890_896_058, DEFAULT_GROUP),
    ("Sísmica - MASW", 1_476_354_654, DEFAULT_GROUP),
    ("Geofísica Geral", 1_750_329_516, DEFAULT_GROUP),
    ("Perfilagem Geofísica", 4_608_209_516, DEFAULT_GROUP),
    ("Perfilagem Ótica", 4_608_206_775, TOPICS_GROUP),
    ("Topografia Geofísica", 5_501_203_736, TOPICS_GROUP),
    ("Licitação", 4_810_781_529, DEFAULT_GROUP),
];

const DEFAULT_FORM_FIELDS: &[&str] = &[
    "1. Tipo de serviço:",
    "2. Nome do solicitante:",
    "3. Empresa (caso exista):",
    "4. Email:",
    "5. Telefone de contato:",
    "6. Local do serviço:",
    "7. Tamanho da área de pesquisa:",
    "8. Previsão de realização do serviço:",
    "9. Observações:",
];

/// Options, routes, form fields and reply texts of the intake dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeScript {
    pub company_name: String,
    /// Selectable services in menu order.
    pub options: Vec<String>,
    /// Tracker board per service.
    pub routes: HashMap<String, BoardRoute>,
    pub form_fields: Vec<String>,
    pub min_form_length: usize,
}

impl Default for IntakeScript {
    fn default() -> Self {
        Self {
            company_name: DEFAULT_COMPANY_NAME.to_string(),
            options: DEFAULT_OPTIONS
                .iter()
                .map(|(name, _, _)| (*name).to_string())
                .collect(),
            routes: DEFAULT_OPTIONS
                .iter()
                .map(|(name, board, group)| ((*name).to_string(), BoardRoute::new(*board, *group)))
                .collect(),
            form_fields: DEFAULT_FORM_FIELDS.iter().map(|f| (*f).to_string()).collect(),
            min_form_length: DEFAULT_MIN_FORM_LENGTH,
        }
    }
}

impl IntakeScript {
    #[must_use]
    pub fn with_company_name(mut self, company_name: impl Into<String>) -> Self {
        self.company_name = company_name.into();
        self
    }

    #[must_use]
    pub fn with_min_form_length(mut self, min_form_length: usize) -> Self {
        self.min_form_length = min_form_length;
        self
    }

    /// Numbered option list, one `"<n> - <label>"` line per option.
    #[must_use]
    pub fn menu(&self) -> String {
        self.options
            .iter()
            .enumerate()
            .map(|(i, option)| format!("{} - {option}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// First reply to an unknown contact.
    #[must_use]
    pub fn greeting(&self) -> String {
        format!(
            "Olá! A {} agradece seu contato.\nComo podemos te ajudar hoje?\n\n{}",
            self.company_name,
            self.menu()
        )
    }

    #[must_use]
    pub fn invalid_option(&self) -> String {
        "Opção inválida. Por favor, escolha uma das opções enviadas anteriormente.".to_string()
    }

    /// Asks for the form after a service was chosen.
    #[must_use]
    pub fn form_request(&self, service: &str) -> String {
        format!(
            "Perfeito! Entendemos que você gostaria de um serviço de *{service}*.\n\n\
             Para seguirmos com sua solicitação e te enviarmos a proposta técnico-comercial, \
             precisamos que nos envie as seguintes informações:\n\n{}",
            self.form_fields.join("\n")
        )
    }

    #[must_use]
    pub fn incomplete_form(&self) -> String {
        format!(
            "⚠️ Sua resposta parece estar incompleta.\n\
             Por favor, envie todas as informações solicitadas no formato texto.\n\n{}",
            self.form_fields.join("\n")
        )
    }

    #[must_use]
    pub fn thanks(&self) -> String {
        "✅ Obrigado pelas informações! Enviaremos sua proposta em breve.".to_string()
    }

    /// Resolves a reply to a canonical option.
    ///
    /// A leading number is read as a 1-based menu index. Anything else must
    /// match an option label exactly, case included.
    #[must_use]
    pub fn resolve_option(&self, input: &str) -> Option<&str> {
        let trimmed = input.trim();
        let digits: String = trimmed.chars().take_while(char::is_ascii_digit).collect();

        if let Ok(index) = digits.parse::<usize>()
            && let Some(option) = index.checked_sub(1).and_then(|i| self.options.get(i))
        {
            return Some(option);
        }

        self.options
            .iter()
            .find(|option| option.as_str() == trimmed)
            .map(String::as_str)
    }

    /// Returns true if the form body is long enough to accept.
    #[must_use]
    pub fn is_form_complete(&self, body: &str) -> bool {
        body.trim().chars().count() >= self.min_form_length
    }

    /// Tracker board for a service.
    #[must_use]
    pub fn route_for(&self, service: &str) -> Option<&BoardRoute> {
        self.routes.get(service)
    }
}

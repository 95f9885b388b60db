//! Indicator groups exported in the snapshot and the sheet columns behind them.

use crate::layout::column_number;
use crate::snapshot::metrics::{Polarity, StatusText};

#[derive(Debug, Clone, Copy)]
pub struct SeriesField {
    pub name: &'static str,
    pub column: u32,
}

const fn field(name: &'static str, letters: &str) -> SeriesField {
    SeriesField {
        name,
        column: column_number(letters),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IndicatorDef {
    pub id: &'static str,
    pub name: &'static str,
    /// Series field whose value becomes the data point `value`.
    pub value_field: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct IndicatorGroup {
    pub id: &'static str,
    /// First sheet row exported for this group.
    pub first_row: u32,
    /// Earliest date exported (YYYY-MM-DD).
    pub start_date: &'static str,
    /// Fields carried on every data point of the group.
    pub fields: &'static [SeriesField],
    pub indicators: &'static [IndicatorDef],
    pub polarity: Polarity,
    pub value_suffix: &'static str,
    pub text: StatusText,
}

const NO_DATA: &str = "暂无数据";

const BOCIASI_FIELDS: &[SeriesField] = &[
    field("close", "C"),
    field("equity_premium", "AF"),
    field("eb_position_gap", "AL"),
    field("eb_yield_gap", "BA"),
    field("margin_balance", "BN"),
    field("turnover", "CB"),
    field("up_down_ratio", "CM"),
    field("ma20", "CP"),
    field("rsi", "CS"),
    field("fast_line", "DC"),
    field("slow_line", "DD"),
    field("di_signal", "DI"),
    field("line_green", "DJ"),
    field("line_black", "DK"),
    field("line_yellow", "DL"),
    field("slow_threshold_1", "EH"),
    field("slow_threshold_0", "EI"),
    field("slow_threshold_neg1", "EJ"),
    field("marker_red", "EN"),
    field("marker_green", "EO"),
    field("fast_threshold_1", "EP"),
    field("fast_threshold_0", "EQ"),
    field("fast_threshold_neg1", "ER"),
    field("marker_fast_buy", "EV"),
    field("marker_fast_sell", "EW"),
];

const BOCIASI_INDICATORS: &[IndicatorDef] = &[
    IndicatorDef { id: "overview", name: "总览", value_field: "slow_line" },
    IndicatorDef { id: "equity_premium", name: "股权溢价", value_field: "equity_premium" },
    IndicatorDef { id: "eb_position_gap", name: "股债位置差", value_field: "eb_position_gap" },
    IndicatorDef { id: "eb_yield_gap", name: "股债收益差", value_field: "eb_yield_gap" },
    IndicatorDef { id: "margin_balance", name: "融资余额", value_field: "margin_balance" },
    IndicatorDef { id: "slow_line", name: "慢线", value_field: "slow_line" },
    IndicatorDef { id: "ma20", name: "MA20", value_field: "ma20" },
    IndicatorDef { id: "turnover", name: "换手率", value_field: "turnover" },
    IndicatorDef { id: "up_down_ratio", name: "涨跌停比", value_field: "up_down_ratio" },
    IndicatorDef { id: "rsi", name: "RSI", value_field: "rsi" },
    IndicatorDef { id: "fast_line", name: "快线", value_field: "fast_line" },
];

const ERP_FIELDS: &[SeriesField] = &[
    field("close", "C"),
    field("erp", "R"),
    field("avg", "S"),
    field("sd1_low", "U"),
    field("sd1_up", "V"),
    field("sd2_low", "W"),
    field("sd2_up", "X"),
];

const ERP_INDICATORS: &[IndicatorDef] = &[IndicatorDef {
    id: "erp_2x",
    name: "ERP 2X",
    value_field: "erp",
}];

pub const BOCIASI: IndicatorGroup = IndicatorGroup {
    id: "bociasi",
    first_row: 2194,
    start_date: "2016-01-01",
    fields: BOCIASI_FIELDS,
    indicators: BOCIASI_INDICATORS,
    polarity: Polarity::LowIsAttractive,
    value_suffix: "",
    text: StatusText {
        attractive: "市场情绪处于低位，可能存在投资机会",
        neutral: "市场情绪中性，建议观望",
        caution: "市场情绪偏热，需要谨慎",
        empty: NO_DATA,
    },
};

pub const WIND_2X_ERP: IndicatorGroup = IndicatorGroup {
    id: "wind_2x_erp",
    first_row: 729,
    start_date: "2005-01-01",
    fields: ERP_FIELDS,
    indicators: ERP_INDICATORS,
    polarity: Polarity::HighIsAttractive,
    value_suffix: "%",
    text: StatusText {
        attractive: "ERP处于高位，股票相对债券具有吸引力",
        neutral: "ERP处于中性水平",
        caution: "ERP处于低位，股票相对债券吸引力较低",
        empty: NO_DATA,
    },
};

pub fn default_groups() -> Vec<IndicatorGroup> {
    vec![BOCIASI, WIND_2X_ERP]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_index(group: &IndicatorGroup, name: &str) -> Option<usize> {
        group.fields.iter().position(|f| f.name == name)
    }

    #[test]
    fn every_indicator_reads_a_declared_field() {
        for group in default_groups() {
            for ind in group.indicators {
                assert!(
                    field_index(&group, ind.value_field).is_some(),
                    "{}/{} reads unknown field {}",
                    group.id,
                    ind.id,
                    ind.value_field
                );
            }
            assert!(group.fields.iter().all(|f| f.column > 0));
        }
    }

    #[test]
    fn columns_match_sheet_letters() {
        let at = |g: &IndicatorGroup, name: &str| g.fields[field_index(g, name).unwrap()].column;
        assert_eq!(at(&BOCIASI, "equity_premium"), 32);
        assert_eq!(at(&BOCIASI, "di_signal"), 113);
        assert_eq!(at(&BOCIASI, "marker_fast_sell"), 153);
        assert_eq!(at(&WIND_2X_ERP, "erp"), 18);
        assert_eq!(at(&WIND_2X_ERP, "sd2_up"), 24);
    }
}

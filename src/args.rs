use clap::Parser;

/// This program clusters municipalities by voting pattern, scores them and estimates the vote transfers between
/// two elections.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) The JSON file describing the analysis: data sources, selected elections and rules.
    /// Relative paths in this file are resolved against its directory.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,
    /// (file path) A reference file containing the summary of an analysis in JSON format. If provided, elanalyze
    /// will check that the computed summary matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (file path, 'stdout' or empty) If specified, the summary of the analysis will be written in JSON format to the
    /// given location. Setting this option overrides the path that may be specified with the --config option.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path or empty) If specified, the records of the units will be written as a CSV table to the given
    /// location.
    #[clap(long, value_parser)]
    pub table: Option<String>,

    /// (file path or empty) The file with the election results in long format. Setting this option overrides the
    /// data sources of the --config option.
    #[clap(short, long, value_parser)]
    pub input: Option<String>,

    /// (csv or xlsx) The type of the input. By default, it is guessed from the extension of the file.
    #[clap(long, value_parser)]
    pub input_type: Option<String>,

    /// When using an Excel file, indicates the name of the worksheet to use. The first worksheet is used otherwise.
    #[clap(long, value_parser)]
    pub excel_worksheet_name: Option<String>,

    /// The election providing the features of the units, for example 'Convocatoria 2015/03'.
    #[clap(long, value_parser)]
    pub start: Option<String>,

    /// (optional) The later election. If provided, the vote transfers are estimated.
    #[clap(long, value_parser)]
    pub end: Option<String>,

    /// (optional) Only keep the units of this province.
    #[clap(long, value_parser)]
    pub province: Option<String>,

    /// (optional) Only keep this municipality.
    #[clap(long, value_parser)]
    pub municipality: Option<String>,

    /// (default 5) The number of clusters.
    #[clap(short = 'k', long, value_parser)]
    pub clusters: Option<usize>,

    /// (default 100) The maximum number of iterations of the clustering.
    #[clap(long, value_parser)]
    pub max_iterations: Option<u32>,

    /// (unsupervised or supervised) How the scores are computed.
    #[clap(long, value_parser)]
    pub mode: Option<String>,

    /// (optional) If provided, the exact ties are broken with a permutation derived from this seed.
    #[clap(long, value_parser)]
    pub random_seed: Option<u64>,

    /// (exclude or imputeMean) What to do with the units that have missing values.
    #[clap(long, value_parser)]
    pub missing_data: Option<String>,

    /// (file path, optional) A CSV file with the historical scores of some units, for the supervised mode.
    #[clap(long, value_parser)]
    pub labels: Option<String>,

    /// If passed as an argument, prints the elections found in the input and exits.
    #[clap(long, takes_value = false)]
    pub list_elections: bool,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
